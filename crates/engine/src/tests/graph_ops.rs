// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;
use std::time::Instant;

use portkit_core::params::{PlaylistConfig, PlaylistKind, Service, SessionConfig};
use portkit_core::{config_helpers, ComponentParts, ComponentRegistry, ComponentState};
use portkit_nodes::audio::renderer::PcmFormat;
use portkit_nodes::sources::provider::{flavour_for_role, FLAVOURS};
use portkit_nodes::sources::streaming::{StreamingSourceConfig, StreamingSourceProcessor};
use portkit_nodes::test_utils::{FakeProvider, RecordingSink, ScriptedTransport};
use portkit_nodes::transfer::TransportFactory;
use serde_json::json;

use super::{decoder_parts, renderer_parts};
use crate::ops::{FIRST_TUNNEL, SECOND_TUNNEL};
use crate::services::SOURCE_COMPONENT;
use crate::{Graph, GraphOps, ServiceConfig};

const URLS: [&str; 3] = ["http://music/1.mp3", "http://music/2.mp3", "http://music/3.mp3"];

fn registry(transport: &ScriptedTransport, sink: &RecordingSink) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    let roles: Vec<&str> = FLAVOURS.iter().map(|f| f.role).collect();
    let transport = transport.clone();
    registry.register(
        SOURCE_COMPONENT,
        &roles,
        move |role, params| {
            let flavour = *flavour_for_role(role).unwrap();
            let config: StreamingSourceConfig = config_helpers::parse_config_optional(params)?;
            let ports = StreamingSourceProcessor::<FakeProvider>::ports(&config);
            let transport = transport.clone();
            let factory: TransportFactory = Arc::new(move || Box::new(transport.clone()));
            let provider = FakeProvider::new(&URLS);
            let processor = StreamingSourceProcessor::new(flavour, config, provider, factory);
            Ok(ComponentParts::new(role, ports, Box::new(processor)))
        },
        serde_json::Value::Null,
        "scripted source",
    );
    registry.register(
        "test.mp3_decoder",
        &["audio_decoder.mp3"],
        |_, _| Ok(decoder_parts(22050, 1)),
        serde_json::Value::Null,
        "fake mp3 decoder",
    );
    let sink = sink.clone();
    registry.register(
        "test.pcm_renderer",
        &["audio_renderer.pcm"],
        move |_, _| Ok(renderer_parts(sink.clone())),
        serde_json::Value::Null,
        "recording renderer",
    );
    registry
}

fn ops(transport: &ScriptedTransport, sink: &RecordingSink) -> GraphOps {
    let playlist =
        PlaylistConfig { kind: PlaylistKind::Artist, name: "Nina".into(), ..Default::default() };
    let mut config = ServiceConfig::new(Service::Gmusic, SessionConfig::default(), playlist);
    config.cache_seconds = 0;
    config.source = Some(json!({ "min_buffer_size": 16 }));
    GraphOps::new(Arc::new(registry(transport, sink)), config)
}

fn push_track(transport: &ScriptedTransport, body: &[u8]) {
    transport.push_header(&format!("Content-Length: {}", body.len()));
    transport.push_header("Content-Type: audio/mpeg");
    transport.push_data(body);
    transport.push_finished();
}

/// Polls, pumps and dispatches until the graph has nothing left to do.
fn step(graph: &mut Graph, ops: &mut GraphOps) {
    graph.poll_io();
    graph.fire_timers(Instant::now());
    loop {
        graph.pump();
        let updates = graph.drain_events();
        if updates.is_empty() {
            break;
        }
        for update in &updates {
            ops.handle_event(graph, update);
        }
    }
}

fn play_until(graph: &mut Graph, ops: &mut GraphOps, tracks: u32) {
    for _ in 0..10 {
        step(graph, ops);
        if ops.tracks_played() >= tracks {
            return;
        }
    }
    panic!("only {} of {tracks} tracks played", ops.tracks_played());
}

fn pcm(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|b| [*b, 0]).collect()
}

#[test]
fn test_skip_back_reuses_the_reconfigured_chain() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut graph = Graph::new();
    let mut ops = ops(&transport, &sink);
    ops.start(&mut graph).unwrap();
    step(&mut graph, &mut ops);

    push_track(&transport, b"abcdefgh");
    play_until(&mut graph, &mut ops, 1);

    // Detection built the chain and the renderer followed the decoder.
    assert!(ops.fatal_error().is_none(), "{:?}", ops.fatal_error());
    assert_eq!(ops.tunnels().len(), 2);
    let mono = PcmFormat { sample_rate: 22050, channels: 1, bits_per_sample: 16 };
    assert_eq!(sink.format(), Some(mono));
    let tunnels = ops.tunnels().to_vec();
    let (source, decoder) = (ops.source().unwrap(), ops.decoder().unwrap());
    // End of track moved forward.
    assert_eq!(transport.opened().last().map(|u| u.as_str()), Some(URLS[1]));

    ops.do_skip(&mut graph, -1).unwrap();
    assert_eq!(transport.opened().last().map(|u| u.as_str()), Some(URLS[0]));
    step(&mut graph, &mut ops);
    assert_eq!(ops.metadata().get("Artist 0").map(String::as_str), Some("Title 0"));
    assert!(!ops.metadata().contains_key("Artist 1"));

    // The chain is kept across the skip and both tunnels still negotiate.
    ops.do_reconfigure_tunnel(&mut graph, FIRST_TUNNEL).unwrap();
    ops.do_reconfigure_tunnel(&mut graph, SECOND_TUNNEL).unwrap();
    assert!(graph.component(source).unwrap().port_enabled(0));
    assert!(graph.component(decoder).unwrap().port_enabled(0));
    assert!(graph.component(decoder).unwrap().port_enabled(1));
    assert_eq!(ops.tunnels(), tunnels.as_slice());
    assert_eq!(ops.decoder(), Some(decoder));

    push_track(&transport, b"ijkl");
    play_until(&mut graph, &mut ops, 2);

    assert!(ops.fatal_error().is_none(), "{:?}", ops.fatal_error());
    for id in graph.ids() {
        assert_eq!(graph.component(id).unwrap().state(), ComponentState::Executing);
    }
    assert_eq!(sink.format(), Some(mono));
    assert_eq!((ops.renderer_pcm().sample_rate, ops.renderer_pcm().channels), (22050, 1));
    assert_eq!(sink.bytes(), [pcm(b"abcdefgh"), pcm(b"ijkl")].concat());
    assert_eq!(sink.drained(), 2);
    let opened: Vec<String> = transport.opened().iter().map(ToString::to_string).collect();
    assert_eq!(opened, [URLS[0], URLS[1], URLS[0], URLS[1]]);
}

#[test]
fn test_skip_back_from_the_first_track_wraps() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut graph = Graph::new();
    let mut ops = ops(&transport, &sink);
    ops.start(&mut graph).unwrap();
    step(&mut graph, &mut ops);

    ops.do_skip(&mut graph, -1).unwrap();
    step(&mut graph, &mut ops);

    assert_eq!(transport.opened().last().map(|u| u.as_str()), Some(URLS[2]));
    assert_eq!(ops.metadata().get("Artist 2").map(String::as_str), Some("Title 2"));
    assert!(ops.tunnels().is_empty(), "no chain before the first bytes");

    // Detection still runs for the track that actually plays.
    push_track(&transport, b"mnop");
    play_until(&mut graph, &mut ops, 1);
    assert_eq!(ops.tunnels().len(), 2);
    assert_eq!(sink.bytes(), pcm(b"mnop"));
}
