// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use portkit_core::{Command, ComponentEvent, ComponentState, ErrorCode};
use portkit_nodes::test_utils::RecordingSink;

use super::{decoder_parts, events, filled, renderer_parts};
use crate::{ComponentId, Endpoint, Graph, TunnelId};

/// Decoder feeding a renderer, both Loaded.
fn chain(sink: &RecordingSink, buffers: u32) -> (Graph, ComponentId, ComponentId, TunnelId) {
    let mut graph = Graph::new();
    let decoder = graph.add("decoder", decoder_parts(48000, 2));
    let renderer = graph.add("renderer", renderer_parts(sink.clone()));
    let tunnel = graph
        .setup_tunnel(Endpoint::new(decoder, 1), Endpoint::new(renderer, 0), Some(buffers))
        .unwrap();
    (graph, decoder, renderer, tunnel)
}

fn execute(graph: &mut Graph, ids: &[ComponentId]) {
    for state in [ComponentState::Idle, ComponentState::Executing] {
        for id in ids.iter().rev() {
            graph.send_command(*id, Command::StateSet(state)).unwrap();
        }
    }
}

#[test]
fn test_incompatible_formats_are_refused() {
    let mut graph = Graph::new();
    let a = graph.add("a", decoder_parts(48000, 2));
    let b = graph.add("b", decoder_parts(48000, 2));
    // PCM out into an MP3 input.
    let err = graph.setup_tunnel(Endpoint::new(a, 1), Endpoint::new(b, 0), None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PortsNotCompatible);
    assert_eq!(graph.tunnel(0), None);
}

#[test]
fn test_tunnel_must_run_output_to_input() {
    let sink = RecordingSink::new();
    let mut graph = Graph::new();
    let decoder = graph.add("decoder", decoder_parts(48000, 2));
    let renderer = graph.add("renderer", renderer_parts(sink));
    let err = graph
        .setup_tunnel(Endpoint::new(renderer, 0), Endpoint::new(decoder, 1), None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadParameter);
}

#[test]
fn test_live_port_cannot_be_tunnelled() {
    let mut graph = Graph::new();
    let decoder = graph.add("decoder", decoder_parts(48000, 2));
    let renderer = graph.add("renderer", renderer_parts(RecordingSink::new()));
    graph.send_command(renderer, Command::StateSet(ComponentState::Idle)).unwrap();
    let err = graph
        .setup_tunnel(Endpoint::new(decoder, 1), Endpoint::new(renderer, 0), None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IncorrectStateOperation);
}

#[test]
fn test_headers_are_seeded_once_the_output_is_live() {
    let sink = RecordingSink::new();
    let (mut graph, decoder, renderer, tunnel) = chain(&sink, 3);
    assert_eq!(graph.parked(tunnel), 3, "nothing is delivered to a Loaded component");

    execute(&mut graph, &[decoder, renderer]);
    assert_eq!(graph.parked(tunnel), 0);
    assert_eq!(graph.component(decoder).unwrap().queued(1), 3);
}

#[test]
fn test_data_flows_across_the_tunnel() {
    let sink = RecordingSink::new();
    let (mut graph, decoder, renderer, _) = chain(&sink, 2);
    execute(&mut graph, &[decoder, renderer]);
    events(&mut graph);

    graph.deliver(Endpoint::new(decoder, 0), filled(100, &[1, 2, 3, 4], true)).unwrap();
    assert!(graph.pump() > 0);

    assert_eq!(sink.bytes(), vec![1, 0, 2, 0, 3, 0, 4, 0]);
    assert_eq!(sink.drained(), 1);
    assert!(events(&mut graph).contains(&ComponentEvent::eos(0)));
    // The consumed header goes back to the decoder, emptied.
    assert_eq!(graph.component(decoder).unwrap().queued(1), 2);
    // The input header was never tunnelled.
    let unrouted = graph.take_unrouted();
    assert_eq!(unrouted.len(), 1);
    assert_eq!(unrouted[0].0, Endpoint::new(decoder, 0));
}

#[test]
fn test_disabled_input_parks_until_enabled() {
    let sink = RecordingSink::new();
    let (mut graph, decoder, renderer, tunnel) = chain(&sink, 2);
    execute(&mut graph, &[decoder, renderer]);

    graph.send_command(renderer, Command::PortDisable(0)).unwrap();
    graph.deliver(Endpoint::new(decoder, 0), filled(100, b"xy", true)).unwrap();
    graph.pump();
    assert!(sink.bytes().is_empty());
    assert_eq!(graph.parked(tunnel), 1, "the filled header waits for the renderer");

    graph.send_command(renderer, Command::PortEnable(0)).unwrap();
    assert_eq!(graph.parked(tunnel), 0);
    graph.pump();
    assert_eq!(sink.bytes(), vec![b'x', 0, b'y', 0]);
}

#[test]
fn test_back_to_loaded_parks_the_whole_pool() {
    let sink = RecordingSink::new();
    let (mut graph, decoder, renderer, tunnel) = chain(&sink, 4);
    execute(&mut graph, &[decoder, renderer]);

    for state in [ComponentState::Idle, ComponentState::Loaded] {
        for id in [decoder, renderer] {
            graph.send_command(id, Command::StateSet(state)).unwrap();
        }
    }
    assert_eq!(graph.component(decoder).unwrap().queued(1), 0);
    assert_eq!(graph.parked(tunnel), 4, "no header is lost");
}
