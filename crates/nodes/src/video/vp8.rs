// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! VP8 decoder component.
//!
//! Port 0 takes an IVF file or a raw VP8 elementary stream, port 1 emits
//! tightly packed I420 pictures, one per output header. The codec itself is
//! supplied through [`VideoDecoderFactory`].

use std::sync::Arc;

use opentelemetry::{global, metrics::Counter, KeyValue};
use portkit_core::port::{Port, VideoPort};
use portkit_core::types::VideoFormat;
use portkit_core::{
    config_helpers, BufferFlags, ComponentEvent, ComponentParts, ComponentRegistry, Direction,
    HeaderSlot, Kernel, Param, ParamIndex, PortFormat, PortKitError, Processor, Result,
};
use schemars::JsonSchema;
use serde::Deserialize;

use super::ivf::{
    find_stream_info, FrameReader, ReadOutcome, StreamHeader, StreamKind, PROBE_LEN, VP8_FOURCC,
};
use super::{DecodedImage, StreamInfo, VideoDecoder};

pub const INPUT_PORT: u32 = 0;
pub const OUTPUT_PORT: u32 = 1;

pub type VideoDecoderFactory = Arc<dyn Fn() -> Box<dyn VideoDecoder> + Send + Sync>;

/// Reads width and height from a VP8 keyframe header.
///
/// Returns `None` for interframes and for anything that is not VP8.
pub fn peek_keyframe_info(data: &[u8]) -> Option<StreamInfo> {
    if data.len() < 10 {
        return None;
    }
    let tag = u32::from(data[0]) | (u32::from(data[1]) << 8) | (u32::from(data[2]) << 16);
    let is_keyframe = tag & 1 == 0;
    let version = (tag >> 1) & 7;
    if !is_keyframe || version > 3 || data[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u32::from(u16::from_le_bytes([data[6], data[7]]) & 0x3fff);
    let height = u32::from(u16::from_le_bytes([data[8], data[9]]) & 0x3fff);
    if width == 0 || height == 0 {
        return None;
    }
    Some(StreamInfo { width, height, is_keyframe })
}

const fn default_input_buffer_size() -> usize {
    128 * 1024
}

const fn default_output_buffer_size() -> usize {
    // One 640x360 I420 picture.
    640 * 360 * 3 / 2
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct Vp8DecoderConfig {
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,
    /// Must hold a whole decoded picture.
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: usize,
}

impl Default for Vp8DecoderConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: default_input_buffer_size(),
            output_buffer_size: default_output_buffer_size(),
        }
    }
}

struct DecoderMetrics {
    decoded: Counter<u64>,
    discarded: Counter<u64>,
    labels: [KeyValue; 1],
}

impl DecoderMetrics {
    fn new(component: &str) -> Self {
        let meter = global::meter("portkit_nodes");
        Self {
            decoded: meter
                .u64_counter("vp8_decoder.frames_decoded")
                .with_description("Frames decoded and delivered downstream")
                .build(),
            discarded: meter
                .u64_counter("vp8_decoder.frames_discarded")
                .with_description("Frames dropped as invalid, corrupt or oversized")
                .build(),
            labels: [KeyValue::new("component", component.to_string())],
        }
    }
}

/// Where the decode loop stands with respect to stream detection.
enum Framing {
    /// Collecting the first bytes of the stream.
    Probing(Vec<u8>),
    /// Detected. `backlog` holds probe bytes that belong to the first frames.
    Reading { reader: FrameReader, backlog: Vec<u8> },
}

pub struct Vp8DecoderProcessor {
    decoder: Box<dyn VideoDecoder>,
    input: HeaderSlot,
    output: HeaderSlot,
    framing: Framing,
    stream: Option<StreamHeader>,
    eos: bool,
    metrics: Option<DecoderMetrics>,
}

impl Vp8DecoderProcessor {
    pub fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        Self {
            decoder,
            input: HeaderSlot::new(INPUT_PORT),
            output: HeaderSlot::new(OUTPUT_PORT),
            framing: Framing::Probing(Vec::with_capacity(PROBE_LEN)),
            stream: None,
            eos: false,
            metrics: None,
        }
    }

    pub fn ports(config: &Vp8DecoderConfig) -> Vec<Box<dyn Port>> {
        vec![
            Box::new(VideoPort::vp8(INPUT_PORT, Direction::Input, config.input_buffer_size)),
            Box::new(VideoPort::yuv420(OUTPUT_PORT, Direction::Output, config.output_buffer_size)),
        ]
    }

    /// Parameters of the stream being decoded, once detected.
    pub const fn stream(&self) -> Option<&StreamHeader> {
        self.stream.as_ref()
    }

    fn discard(&self, n: u64) {
        if let Some(m) = &self.metrics {
            m.discarded.add(n, &m.labels);
        }
    }

    fn backlog_pending(&self) -> bool {
        matches!(&self.framing, Framing::Reading { backlog, .. } if !backlog.is_empty())
    }

    fn release_all(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.input.release(kernel)?;
        self.output.release(kernel)?;
        if let Framing::Reading { reader, backlog } = &mut self.framing {
            reader.reset();
            backlog.clear();
        }
        Ok(())
    }

    /// Gathers probe bytes from the held input header and detects the stream
    /// once enough have arrived.
    fn probe(&mut self, kernel: &dyn Kernel) {
        let Framing::Probing(probe) = &mut self.framing else {
            return;
        };
        let Some(hdr) = self.input.get_mut() else {
            return;
        };
        let n = (PROBE_LEN - probe.len()).min(hdr.filled_len);
        probe.extend_from_slice(&hdr.payload()[..n]);
        hdr.consume(n);
        let at_end = hdr.filled_len == 0 && hdr.flags.contains(BufferFlags::EOS);
        if probe.len() < PROBE_LEN && !at_end {
            return;
        }

        let probe = std::mem::take(probe);
        let header = find_stream_info(&probe, self.decoder.as_ref());
        let (kind, backlog) = match header {
            Some(h) if h.kind == StreamKind::Ivf => (StreamKind::Ivf, Vec::new()),
            Some(_) => (StreamKind::Raw, probe),
            None => {
                tracing::warn!(
                    component = %kernel.component_name(),
                    "Stream is neither IVF nor a raw VP8 keyframe, reading it as raw"
                );
                (StreamKind::Raw, probe)
            },
        };
        if let Some(h) = &header {
            if h.fourcc & 0x00FF_FFFF != VP8_FOURCC & 0x00FF_FFFF {
                tracing::warn!(
                    component = %kernel.component_name(),
                    fourcc = h.fourcc,
                    "Unexpected fourcc"
                );
            }
            tracing::info!(
                component = %kernel.component_name(),
                kind = ?h.kind,
                width = h.width,
                height = h.height,
                fps_num = h.frame_rate.0,
                fps_den = h.frame_rate.1,
                "Stream detected"
            );
        }
        self.stream = header;
        self.framing = Framing::Reading { reader: FrameReader::new(kind), backlog };
    }

    /// Advances the frame reader. Returns true once a complete frame is ready.
    fn read_frame(&mut self, kernel: &dyn Kernel) -> bool {
        let Framing::Reading { reader, backlog } = &mut self.framing else {
            return false;
        };
        let outcome = if backlog.is_empty() {
            let Some(hdr) = self.input.get_mut() else {
                return false;
            };
            let (used, outcome) = reader.feed(hdr.payload());
            hdr.consume(used);
            outcome
        } else {
            let (used, outcome) = reader.feed(backlog);
            backlog.drain(..used);
            outcome
        };
        match outcome {
            ReadOutcome::Frame => true,
            ReadOutcome::NeedMore => false,
            ReadOutcome::Invalid { size } => {
                tracing::error!(
                    component = %kernel.component_name(),
                    size,
                    "Read invalid frame size"
                );
                self.discard(1);
                false
            },
        }
    }

    fn decode_frame(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        let Framing::Reading { reader, .. } = &self.framing else {
            return Ok(());
        };
        let pts = reader.pts();
        let image = match self.decoder.decode(reader.frame()) {
            Ok(Some(image)) => image,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::error!(
                    component = %kernel.component_name(),
                    error = %e,
                    "Failed to decode frame"
                );
                self.discard(1);
                return Ok(());
            },
        };

        let Some(out) = self.output.get_mut() else {
            return Ok(());
        };
        if image.packed_len() > out.remaining_capacity() {
            tracing::warn!(
                component = %kernel.component_name(),
                needed = image.packed_len(),
                available = out.remaining_capacity(),
                "Output buffer too small, dropping picture"
            );
            self.discard(1);
            return Ok(());
        }
        if !copy_planes(&image, out) {
            tracing::warn!(
                component = %kernel.component_name(),
                "Decoded planes are truncated, dropping picture"
            );
            out.filled_len = 0;
            self.discard(1);
            return Ok(());
        }
        if let Some(pts) = pts {
            out.timestamp = i64::try_from(pts).unwrap_or(i64::MAX);
        }
        if let Some(m) = &self.metrics {
            m.decoded.add(1, &m.labels);
        }
        self.update_output_definition(kernel, &image)
    }

    fn update_output_definition(
        &self,
        kernel: &mut dyn Kernel,
        image: &DecodedImage,
    ) -> Result<()> {
        let Param::PortDefinition(mut def) =
            kernel.get_parameter(OUTPUT_PORT, ParamIndex::PortDefinition)?
        else {
            return Err(PortKitError::BadParameter("output port has no definition".to_string()));
        };
        let PortFormat::Video(prev) = def.format.clone() else {
            return Err(PortKitError::BadParameter("output port is not a video port".to_string()));
        };
        let frame_rate = self.stream.map_or(prev.frame_rate, |s| s.frame_rate);
        let next = VideoFormat {
            width: image.width,
            height: image.height,
            stride: image.width,
            slice_height: image.height,
            frame_rate,
            ..prev.clone()
        };
        if next == prev {
            return Ok(());
        }
        let resized = (next.width, next.height) != (prev.width, prev.height);
        def.format = PortFormat::Video(next);
        kernel.set_parameter_internal(OUTPUT_PORT, Param::PortDefinition(def))?;
        if resized {
            kernel.issue_event(ComponentEvent::PortSettingsChanged {
                port: OUTPUT_PORT,
                index: ParamIndex::PortDefinition,
            });
        }
        Ok(())
    }

    fn buffer_emptied(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        if let Some(hdr) = self.input.get_mut() {
            hdr.offset = 0;
            if hdr.flags.contains(BufferFlags::EOS) {
                self.eos = true;
            }
        }
        self.input.release(kernel)?;
        Ok(())
    }

    fn buffer_filled(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        if let Some(hdr) = self.output.get_mut() {
            if self.eos {
                hdr.flags.insert(BufferFlags::EOS);
                self.eos = false;
                tracing::debug!(component = %kernel.component_name(), "End of stream");
            }
        }
        self.output.release(kernel)?;
        Ok(())
    }
}

/// Copies the visible rows of each plane into `out`. Returns false if a plane
/// is shorter than its declared geometry.
fn copy_planes(image: &DecodedImage, out: &mut portkit_core::BufferHeader) -> bool {
    for (idx, (plane, stride)) in image.planes.iter().zip(image.strides).enumerate() {
        let (row_len, rows) = image.plane_size(idx);
        for row in 0..rows {
            let start = row * stride;
            let Some(bytes) = plane.get(start..start + row_len) else {
                return false;
            };
            out.append(bytes);
        }
    }
    true
}

impl Processor for Vp8DecoderProcessor {
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.decoder.init().map_err(|e| {
            tracing::error!(
                component = %kernel.component_name(),
                error = %e,
                "Unable to init the VP8 decoder"
            );
            PortKitError::InsufficientResources(format!("unable to init the VP8 decoder: {e}"))
        })?;
        self.metrics = Some(DecoderMetrics::new(kernel.component_name()));
        Ok(())
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        self.framing = Framing::Probing(Vec::with_capacity(PROBE_LEN));
        self.stream = None;
        Ok(())
    }

    fn prepare_to_transfer(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.framing = Framing::Probing(Vec::with_capacity(PROBE_LEN));
        self.stream = None;
        self.eos = false;
        Ok(())
    }

    fn transfer_and_process(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        Ok(())
    }

    fn stop_and_return(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.release_all(kernel)
    }

    fn buffers_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        loop {
            let has_input = self.input.claim(kernel)?.is_some();
            let has_output = self.output.claim(kernel)?.is_some();
            if !has_input || !has_output {
                return Ok(());
            }

            self.probe(kernel);
            let input_pending = self.input.get().is_some_and(|h| h.filled_len > 0);
            if (self.backlog_pending() || input_pending) && self.read_frame(kernel) {
                self.decode_frame(kernel)?;
            }

            if self.input.get().is_some_and(|h| h.filled_len == 0) && !self.backlog_pending() {
                self.buffer_emptied(kernel)?;
            }
            if self.output.get().is_some_and(|h| h.filled_len > 0) || self.eos {
                self.buffer_filled(kernel)?;
            }
        }
    }

    fn port_flush(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.release_all(kernel)
    }

    fn port_disable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.release_all(kernel)
    }

    fn port_enable(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        Ok(())
    }
}

/// Registers the VP8 decoder. No VP8 codec ships with this crate, so the
/// caller supplies one.
pub fn register_vp8_decoder(registry: &mut ComponentRegistry, factory: VideoDecoderFactory) {
    use schemars::schema_for;

    registry.register(
        "portkit.vp8_decoder",
        &["video_decoder.vp8"],
        move |role, params| {
            let config: Vp8DecoderConfig = config_helpers::parse_config_optional(params)?;
            let ports = Vp8DecoderProcessor::ports(&config);
            Ok(ComponentParts::new(role, ports, Box::new(Vp8DecoderProcessor::new(factory()))))
        },
        serde_json::to_value(schema_for!(Vp8DecoderConfig)).unwrap_or_default(),
        "Decodes IVF or raw VP8 streams into I420 pictures.",
    );
}
