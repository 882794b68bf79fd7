// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Generic audio decoder component.
//!
//! Port 0 takes coded bytes, port 1 emits interleaved signed 16-bit
//! little-endian PCM. When the codec discovers stream parameters that differ
//! from the PCM block on port 1, the block is updated and the client is told
//! through `PortSettingsChanged`, which is what prompts a graph to
//! reconfigure the tunnel towards the renderer.

use bytes::{Buf, BytesMut};
use portkit_core::params::{Mp3Params, PcmParams};
use portkit_core::port::{AudioPort, Port};
use portkit_core::{
    BufferFlags, ComponentEvent, Direction, HeaderSlot, Kernel, Param, ParamIndex, PortKitError,
    Processor, Result,
};
use schemars::JsonSchema;
use serde::Deserialize;

pub const INPUT_PORT: u32 = 0;
pub const OUTPUT_PORT: u32 = 1;

/// A run of decoded, interleaved samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub sample_rate: u32,
    pub channels: u32,
    pub samples: Vec<i16>,
}

/// A push-style audio codec: coded bytes go in, PCM chunks come out.
pub trait AudioDecoder: Send {
    /// # Errors
    ///
    /// Any error here is reported as `InsufficientResources` by the caller.
    fn init(&mut self) -> Result<()>;

    fn push(&mut self, data: &[u8]);

    /// Decodes the next chunk from the bytes pushed so far. `Ok(None)` means
    /// more input is needed.
    ///
    /// # Errors
    ///
    /// `StreamCorrupt`; non-fatal ones skip the affected unit.
    fn decode_next(&mut self) -> Result<Option<PcmChunk>>;

    /// Drops buffered input and codec state.
    fn reset(&mut self);
}

const fn default_input_buffer_size() -> usize {
    8192
}

const fn default_output_buffer_size() -> usize {
    16384
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct AudioDecoderConfig {
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: usize,
}

impl Default for AudioDecoderConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: default_input_buffer_size(),
            output_buffer_size: default_output_buffer_size(),
        }
    }
}

pub struct AudioDecoderProcessor<D> {
    decoder: D,
    input: HeaderSlot,
    output: HeaderSlot,
    pcm: PcmParams,
    pending: BytesMut,
    input_eos: bool,
}

impl<D: AudioDecoder> AudioDecoderProcessor<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            input: HeaderSlot::new(INPUT_PORT),
            output: HeaderSlot::new(OUTPUT_PORT),
            pcm: PcmParams { port_index: OUTPUT_PORT, ..Default::default() },
            pending: BytesMut::new(),
            input_eos: false,
        }
    }

    /// MP3 in, PCM out. The PCM port follows the MP3 port's rate and channels.
    pub fn mp3_ports(config: &AudioDecoderConfig) -> Vec<Box<dyn Port>> {
        vec![
            Box::new(AudioPort::mp3(
                INPUT_PORT,
                Direction::Input,
                config.input_buffer_size,
                Mp3Params::default(),
            )),
            Box::new(
                AudioPort::pcm(
                    OUTPUT_PORT,
                    Direction::Output,
                    config.output_buffer_size,
                    PcmParams { port_index: OUTPUT_PORT, ..Default::default() },
                )
                .with_master(INPUT_PORT),
            ),
        ]
    }

    pub const fn decoder(&self) -> &D {
        &self.decoder
    }

    fn release_all(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.input.release(kernel)?;
        self.output.release(kernel)?;
        Ok(())
    }

    /// Adopts the parameters of a freshly decoded chunk, telling the client
    /// when they differ from what port 1 advertises.
    fn track_format(&mut self, kernel: &mut dyn Kernel, chunk: &PcmChunk) -> Result<()> {
        if (chunk.sample_rate, chunk.channels) == (self.pcm.sample_rate, self.pcm.channels) {
            return Ok(());
        }
        tracing::info!(
            component = %kernel.component_name(),
            sample_rate = chunk.sample_rate,
            channels = chunk.channels,
            "Decoded stream format changed"
        );
        // Whatever is already in the output header belongs to the old format.
        if self.output.get().is_some_and(|h| h.filled_len > 0) {
            self.output.release(kernel)?;
        }
        self.pcm.sample_rate = chunk.sample_rate;
        self.pcm.channels = chunk.channels;
        kernel.set_parameter_internal(OUTPUT_PORT, Param::Pcm(self.pcm.clone()))?;
        kernel.issue_event(ComponentEvent::PortSettingsChanged {
            port: OUTPUT_PORT,
            index: ParamIndex::AudioPcm,
        });
        Ok(())
    }

    /// Moves decoded PCM into output headers. Returns whether anything moved.
    fn fill_output(&mut self, kernel: &mut dyn Kernel) -> Result<bool> {
        let mut progressed = false;
        loop {
            if self.pending.is_empty() {
                match self.decoder.decode_next() {
                    Ok(Some(chunk)) => {
                        self.track_format(kernel, &chunk)?;
                        self.pending.reserve(chunk.samples.len() * 2);
                        for s in &chunk.samples {
                            self.pending.extend_from_slice(&s.to_le_bytes());
                        }
                        if self.pending.is_empty() {
                            continue;
                        }
                    },
                    Ok(None) => break,
                    Err(PortKitError::StreamCorrupt { reason, fatal: false }) => {
                        tracing::warn!(
                            component = %kernel.component_name(),
                            %reason,
                            "Skipping undecodable unit"
                        );
                        continue;
                    },
                    Err(e) => return Err(e),
                }
            }

            let Some(out) = self.output.claim(kernel)? else {
                return Ok(progressed);
            };
            let n = out.append(&self.pending);
            let full = out.is_full();
            self.pending.advance(n);
            progressed |= n > 0;
            if full {
                self.output.release(kernel)?;
            }
        }

        if self.input_eos {
            let Some(out) = self.output.claim(kernel)? else {
                return Ok(progressed);
            };
            out.flags.insert(BufferFlags::EOS);
            self.output.release(kernel)?;
            self.input_eos = false;
            tracing::debug!(component = %kernel.component_name(), "End of stream");
            progressed = true;
        }
        Ok(progressed)
    }

    /// Hands the next input header's bytes to the codec.
    fn feed_input(&mut self, kernel: &mut dyn Kernel) -> Result<bool> {
        if !self.pending.is_empty() || self.input_eos {
            return Ok(false);
        }
        let Some(hdr) = self.input.claim(kernel)? else {
            return Ok(false);
        };
        self.decoder.push(hdr.payload());
        let n = hdr.filled_len;
        hdr.consume(n);
        hdr.offset = 0;
        if hdr.flags.contains(BufferFlags::EOS) {
            self.input_eos = true;
        }
        self.input.release(kernel)?;
        Ok(true)
    }
}

impl<D: AudioDecoder> Processor for AudioDecoderProcessor<D> {
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.decoder.init().map_err(|e| {
            tracing::error!(
                component = %kernel.component_name(),
                error = %e,
                "Unable to init the audio decoder"
            );
            PortKitError::InsufficientResources(format!("unable to init the audio decoder: {e}"))
        })
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        self.decoder.reset();
        self.pending.clear();
        Ok(())
    }

    fn prepare_to_transfer(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        if let Param::Pcm(pcm) = kernel.get_parameter(OUTPUT_PORT, ParamIndex::AudioPcm)? {
            self.pcm = pcm;
        }
        self.input_eos = false;
        Ok(())
    }

    fn transfer_and_process(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        Ok(())
    }

    fn stop_and_return(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.pending.clear();
        self.decoder.reset();
        self.release_all(kernel)
    }

    fn buffers_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        loop {
            let produced = self.fill_output(kernel)?;
            let fed = self.feed_input(kernel)?;
            if !produced && !fed {
                return Ok(());
            }
        }
    }

    fn port_flush(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()> {
        if pid == INPUT_PORT || pid == portkit_core::ALL_PORTS {
            self.decoder.reset();
        }
        if pid == OUTPUT_PORT || pid == portkit_core::ALL_PORTS {
            self.pending.clear();
        }
        self.release_all(kernel)
    }

    fn port_disable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        // Decoded samples stay pending until the port comes back.
        self.release_all(kernel)
    }

    fn port_enable(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()> {
        if pid == OUTPUT_PORT || pid == portkit_core::ALL_PORTS {
            if let Param::Pcm(pcm) = kernel.get_parameter(OUTPUT_PORT, ParamIndex::AudioPcm)? {
                self.pcm = pcm;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeAudioDecoder, MockKernel};
    use portkit_core::{BufferHeader, ErrorCode};

    fn kernel() -> MockKernel {
        MockKernel::new("audio_decoder").with_param(OUTPUT_PORT, Param::Pcm(PcmParams::default()))
    }

    fn processor(
        k: &mut MockKernel,
        rate: u32,
        channels: u32,
    ) -> AudioDecoderProcessor<FakeAudioDecoder> {
        let mut p = AudioDecoderProcessor::new(FakeAudioDecoder::new(rate, channels));
        p.allocate_resources(k, 0).unwrap();
        p.prepare_to_transfer(k, 0).unwrap();
        p
    }

    #[test]
    fn test_format_change_updates_pcm_port() {
        let mut k = kernel();
        let mut p = processor(&mut k, 44100, 1);
        k.offer_payload(INPUT_PORT, &[1, 2]);
        k.offer(OUTPUT_PORT, 2, 4);

        p.buffers_ready(&mut k).unwrap();

        assert_eq!(
            k.events,
            vec![ComponentEvent::PortSettingsChanged {
                port: OUTPUT_PORT,
                index: ParamIndex::AudioPcm,
            }]
        );
        let Some(Param::Pcm(pcm)) = k.param(OUTPUT_PORT, ParamIndex::AudioPcm) else {
            panic!("pcm block missing");
        };
        assert_eq!((pcm.sample_rate, pcm.channels), (44100, 1));
        assert_eq!(k.released_payload(OUTPUT_PORT), vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_same_format_raises_no_event() {
        let mut k = kernel();
        let mut p = processor(&mut k, 48000, 2);
        k.offer_payload(INPUT_PORT, &[7, 8]);
        k.offer(OUTPUT_PORT, 1, 4);
        p.buffers_ready(&mut k).unwrap();
        assert!(k.events.is_empty());
    }

    #[test]
    fn test_pending_pcm_spans_output_headers() {
        let mut k = kernel();
        let mut p = processor(&mut k, 48000, 2);
        k.offer_payload(INPUT_PORT, &[1, 2, 3, 4, 5]);
        k.offer(OUTPUT_PORT, 1, 4);
        p.buffers_ready(&mut k).unwrap();
        assert_eq!(k.released_payload(OUTPUT_PORT), vec![1, 0, 2, 0]);

        k.offer(OUTPUT_PORT, 2, 4);
        p.buffers_ready(&mut k).unwrap();
        assert_eq!(k.released_payload(OUTPUT_PORT), vec![1, 0, 2, 0, 3, 0, 4, 0]);
        // The fifth sample waits in a partially filled header.
        p.stop_and_return(&mut k).unwrap();
        assert_eq!(k.released_payload(OUTPUT_PORT), vec![1, 0, 2, 0, 3, 0, 4, 0, 5, 0]);
    }

    #[test]
    fn test_eos_flushes_partial_output() {
        let mut k = kernel();
        let mut p = processor(&mut k, 48000, 2);
        let mut hdr = BufferHeader::new(77, 8);
        hdr.append(&[9]);
        hdr.flags.insert(BufferFlags::EOS);
        k.offer_header(INPUT_PORT, hdr);
        k.offer(OUTPUT_PORT, 2, 16);

        p.buffers_ready(&mut k).unwrap();

        let out = k.take_released(OUTPUT_PORT);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload(), &[9, 0]);
        assert!(out[0].flags.contains(BufferFlags::EOS));
    }

    #[test]
    fn test_waits_without_output_headers() {
        let mut k = kernel();
        let mut p = processor(&mut k, 48000, 2);
        k.offer_payload(INPUT_PORT, &[1]);
        k.offer_payload(INPUT_PORT, &[2]);
        p.buffers_ready(&mut k).unwrap();
        // First input decoded into pending, second still queued.
        assert_eq!(k.queued(INPUT_PORT), 1);
        assert!(k.take_released(OUTPUT_PORT).is_empty());
    }

    #[test]
    fn test_init_failure_is_insufficient_resources() {
        let mut k = kernel();
        let mut decoder = FakeAudioDecoder::new(48000, 2);
        decoder.fail_init = true;
        let mut p = AudioDecoderProcessor::new(decoder);
        assert_eq!(
            p.allocate_resources(&mut k, 0).unwrap_err().code(),
            ErrorCode::InsufficientResources
        );
    }
}
