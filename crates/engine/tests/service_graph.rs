// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Service playback graphs driven end to end over a scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use portkit_core::params::{PlaylistConfig, PlaylistKind, Service, SessionConfig};
use portkit_core::types::AudioCoding;
use portkit_core::{
    config_helpers, ComponentParts, ComponentRegistry, ComponentState, ErrorCode, PortKitError,
};
use portkit_engine::ops::FIRST_TUNNEL;
use portkit_engine::{Engine, Graph, GraphDriver, GraphOps, ServiceConfig};
use portkit_nodes::audio::decoder::{AudioDecoderConfig, AudioDecoderProcessor};
use portkit_nodes::audio::renderer::{PcmFormat, PcmRendererConfig, PcmRendererProcessor};
use portkit_nodes::sources::provider::{flavour_for_role, FLAVOURS};
use portkit_nodes::sources::streaming::{StreamingSourceConfig, StreamingSourceProcessor};
use portkit_nodes::test_utils::{FakeAudioDecoder, FakeProvider, RecordingSink, ScriptedTransport};
use portkit_nodes::transfer::TransportFactory;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const URLS: [&str; 3] = ["http://music/1.mp3", "http://music/2.mp3", "http://music/3.mp3"];

fn registry(
    transport: &ScriptedTransport,
    sink: &RecordingSink,
    with_decoder: bool,
) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();

    let roles: Vec<&str> = FLAVOURS.iter().map(|f| f.role).collect();
    let transport = transport.clone();
    registry.register(
        "portkit.audio_source.http",
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

    if with_decoder {
        registry.register(
            "test.mp3_decoder",
            &["audio_decoder.mp3"],
            |role, _| {
                let config = AudioDecoderConfig { input_buffer_size: 64, output_buffer_size: 64 };
                Ok(ComponentParts::new(
                    role,
                    AudioDecoderProcessor::<FakeAudioDecoder>::mp3_ports(&config),
                    Box::new(AudioDecoderProcessor::new(FakeAudioDecoder::new(22050, 1))),
                ))
            },
            serde_json::Value::Null,
            "fake mp3 decoder",
        );
    }

    let sink = sink.clone();
    registry.register(
        "test.pcm_renderer",
        &["audio_renderer.pcm"],
        move |role, _| {
            let config = PcmRendererConfig { input_buffer_size: 64, ..Default::default() };
            Ok(ComponentParts::new(
                role,
                PcmRendererProcessor::<RecordingSink>::ports(&config),
                Box::new(PcmRendererProcessor::new(sink.clone())),
            ))
        },
        serde_json::Value::Null,
        "recording renderer",
    );

    registry
}

fn config() -> ServiceConfig {
    let playlist = PlaylistConfig {
        kind: PlaylistKind::Artist,
        name: "Miles Davis".into(),
        ..Default::default()
    };
    let mut config = ServiceConfig::new(Service::Gmusic, SessionConfig::default(), playlist);
    config.cache_seconds = 0;
    config.source = Some(json!({ "min_buffer_size": 16 }));
    config
}

fn driver(transport: &ScriptedTransport, sink: &RecordingSink, with_decoder: bool) -> GraphDriver {
    Engine::with_registry(registry(transport, sink, with_decoder)).service_driver(config())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn push_track(transport: &ScriptedTransport, content_type: &str, body: &[u8]) {
    transport.push_header(&format!("Content-Length: {}", body.len()));
    transport.push_header(&format!("Content-Type: {content_type}"));
    transport.push_data(body);
    transport.push_finished();
}

/// Pumps and dispatches until the graph is quiet, like the driver does.
fn settle(graph: &mut Graph, ops: &mut GraphOps) {
    loop {
        graph.pump();
        let events = graph.drain_events();
        if events.is_empty() {
            break;
        }
        for update in &events {
            ops.handle_event(graph, update);
        }
    }
}

#[test]
fn test_detection_builds_chain_and_follows_decoder_format() {
    init_tracing();
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut driver = driver(&transport, &sink, true);

    driver.start().unwrap();
    let source = driver.ops().source().unwrap();
    assert_eq!(driver.graph().component(source).unwrap().state(), ComponentState::Executing);
    assert_eq!(driver.ops().metadata().get("Artist 0").map(String::as_str), Some("Title 0"));
    assert_eq!(driver.ops().decoder(), None, "no decoder before the first bytes");

    push_track(&transport, "audio/mpeg", b"abcdefgh");
    for _ in 0..10 {
        driver.step(Instant::now());
        if driver.ops().tracks_played() > 0 {
            break;
        }
    }

    let ops = driver.ops();
    assert!(ops.fatal_error().is_none(), "{:?}", ops.fatal_error());
    assert_eq!(ops.encoding(), AudioCoding::Mp3);
    assert_eq!(ops.tunnels().len(), 2);
    for id in driver.graph().ids() {
        assert_eq!(driver.graph().component(id).unwrap().state(), ComponentState::Executing);
    }

    // The renderer followed the decoder's 22050 Hz mono output.
    assert_eq!(
        sink.format(),
        Some(PcmFormat { sample_rate: 22050, channels: 1, bits_per_sample: 16 })
    );
    assert_eq!((ops.renderer_pcm().sample_rate, ops.renderer_pcm().channels), (22050, 1));
    let expected: Vec<u8> = b"abcdefgh".iter().flat_map(|b| [*b, 0]).collect();
    assert_eq!(sink.bytes(), expected);
    assert_eq!(sink.drained(), 1);

    // End of track skipped to the next one.
    assert_eq!(ops.tracks_played(), 1);
    let opened = transport.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].as_str(), URLS[1]);
    assert_eq!(ops.metadata().get("Artist 1").map(String::as_str), Some("Title 1"));
}

#[test]
fn test_unknown_content_type_is_fatal() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut driver = driver(&transport, &sink, true);
    driver.start().unwrap();

    push_track(&transport, "text/html", b"<html>");
    driver.step(Instant::now());

    let fatal = driver.ops().fatal_error().expect("detection failure is fatal");
    assert_eq!(fatal.code, ErrorCode::FormatNotDetected);
    assert!(fatal.component.contains("portkit.audio_source.http"));
    assert_eq!(driver.ops().decoder(), None);
    assert!(sink.format().is_none());
}

#[test]
fn test_missing_decoder_is_fatal() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut driver = driver(&transport, &sink, false);
    driver.start().unwrap();

    push_track(&transport, "audio/mpeg", b"abcdefgh");
    driver.step(Instant::now());

    let fatal = driver.ops().fatal_error().expect("no decoder for the stream");
    assert_eq!(fatal.code, ErrorCode::InsufficientResources);
    assert!(driver.ops().tunnels().is_empty());
}

#[test]
fn test_service_without_http_flavour_fails_to_start() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut config = config();
    config.service = Service::Spotify;
    let mut driver =
        Engine::with_registry(registry(&transport, &sink, true)).service_driver(config);

    let err = driver.start().unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedSetting);
    assert!(driver.ops().fatal_error().is_none());
    assert!(transport.opened().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_cancel_and_unloads() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut driver = driver(&transport, &sink, true).with_poll_interval(Duration::from_millis(1));

    let cancel = CancellationToken::new();
    cancel.cancel();
    driver.run(cancel).await.unwrap();

    let source = driver.ops().source().unwrap();
    assert_eq!(driver.graph().component(source).unwrap().state(), ComponentState::Loaded);
}

#[tokio::test]
async fn test_run_reports_fatal_error() {
    init_tracing();
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut driver = driver(&transport, &sink, false).with_poll_interval(Duration::from_millis(1));
    push_track(&transport, "audio/mpeg", b"abcdefgh");

    let result = tokio::time::timeout(Duration::from_secs(5), driver.run(CancellationToken::new()))
        .await
        .expect("the driver gives up on a fatal error");

    match result {
        Err(PortKitError::Runtime(report)) => {
            assert!(report.contains("insufficient_resources"), "{report}");
        },
        other => panic!("expected a runtime error, got {other:?}"),
    }
    let source = driver.ops().source().unwrap();
    assert_eq!(driver.graph().component(source).unwrap().state(), ComponentState::Loaded);
}

#[test]
fn test_first_tunnel_reconfiguration_keeps_a_matching_decoder() {
    let transport = ScriptedTransport::new();
    let sink = RecordingSink::new();
    let mut graph = Graph::new();
    let mut ops = GraphOps::new(Arc::new(registry(&transport, &sink, true)), config());
    ops.start(&mut graph).unwrap();
    settle(&mut graph, &mut ops);

    transport.push_header("Content-Type: audio/mpeg");
    transport.push_data(b"abcd");
    graph.poll_io();
    settle(&mut graph, &mut ops);
    assert_eq!(ops.tunnels().len(), 2);

    ops.do_reconfigure_tunnel(&mut graph, FIRST_TUNNEL).unwrap();
    let source = ops.source().unwrap();
    let decoder = ops.decoder().unwrap();
    assert!(graph.component(source).unwrap().port_enabled(0));
    assert!(graph.component(decoder).unwrap().port_enabled(0));
    assert!(ops.fatal_error().is_none());

    let err = ops.do_reconfigure_tunnel(&mut graph, 5).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadParameter);
}

#[test]
fn test_only_the_first_fatal_error_is_kept() {
    assert!(GraphOps::is_fatal_error(ErrorCode::InsufficientResources));
    assert!(GraphOps::is_fatal_error(ErrorCode::StreamCorruptFatal));
    assert!(!GraphOps::is_fatal_error(ErrorCode::BadParameter));
    assert!(!GraphOps::is_fatal_error(ErrorCode::UnsupportedSetting));

    let graph = Graph::new();
    let mut ops = GraphOps::new(Arc::new(ComponentRegistry::new()), config());
    ops.do_record_fatal_error(&graph, None, ErrorCode::FormatNotDetected, Some(0));
    ops.do_record_fatal_error(&graph, None, ErrorCode::InsufficientResources, None);

    let fatal = ops.fatal_error().unwrap();
    assert_eq!(fatal.code, ErrorCode::FormatNotDetected);
    assert_eq!(fatal.to_string(), "graph: fatal error 'format_not_detected' on port 0");
}

#[test]
fn test_skip_by_zero_is_a_no_op() {
    let mut graph = Graph::new();
    let mut ops = GraphOps::new(Arc::new(ComponentRegistry::new()), config());
    ops.do_skip(&mut graph, 0).unwrap();
    // Anything else needs a source.
    assert!(ops.do_skip(&mut graph, 1).is_err());
}
