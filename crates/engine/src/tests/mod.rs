// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Unit tests for the engine crate.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use portkit_core::{BufferFlags, BufferHeader, ComponentEvent, ComponentParts};
use portkit_nodes::audio::decoder::{AudioDecoderConfig, AudioDecoderProcessor};
use portkit_nodes::audio::renderer::{PcmRendererConfig, PcmRendererProcessor};
use portkit_nodes::test_utils::{FakeAudioDecoder, RecordingSink};

use crate::Graph;

mod graph_ops;
mod tunnels;

pub(super) fn decoder_parts(sample_rate: u32, channels: u32) -> ComponentParts {
    let config = AudioDecoderConfig { input_buffer_size: 64, output_buffer_size: 64 };
    ComponentParts::new(
        "audio_decoder.mp3",
        AudioDecoderProcessor::<FakeAudioDecoder>::mp3_ports(&config),
        Box::new(AudioDecoderProcessor::new(FakeAudioDecoder::new(sample_rate, channels))),
    )
}

pub(super) fn renderer_parts(sink: RecordingSink) -> ComponentParts {
    let config = PcmRendererConfig { input_buffer_size: 64, ..Default::default() };
    ComponentParts::new(
        "audio_renderer.pcm",
        PcmRendererProcessor::<RecordingSink>::ports(&config),
        Box::new(PcmRendererProcessor::new(sink)),
    )
}

/// A filled header, optionally marked as the last one.
pub(super) fn filled(id: u64, payload: &[u8], eos: bool) -> BufferHeader {
    let mut header = BufferHeader::new(id, 64);
    header.append(payload);
    if eos {
        header.flags.insert(BufferFlags::EOS);
    }
    header
}

/// Events raised since the last call, without the component names.
pub(super) fn events(graph: &mut Graph) -> Vec<ComponentEvent> {
    graph.drain_events().into_iter().map(|u| u.event).collect()
}
