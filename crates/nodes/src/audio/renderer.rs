// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PCM renderer component and its sinks.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use portkit_core::params::PcmParams;
use portkit_core::port::{AudioPort, Port};
use portkit_core::{
    config_helpers, BufferFlags, ComponentEvent, ComponentParts, ComponentRegistry, Direction,
    HeaderSlot, Kernel, Param, ParamIndex, PortKitError, Processor, Result,
};
use schemars::JsonSchema;
use serde::Deserialize;

pub const INPUT_PORT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
}

impl From<&PcmParams> for PcmFormat {
    fn from(p: &PcmParams) -> Self {
        Self {
            sample_rate: p.sample_rate,
            channels: p.channels,
            bits_per_sample: p.bits_per_sample,
        }
    }
}

/// Where rendered PCM ends up.
pub trait PcmSink: Send {
    /// # Errors
    ///
    /// Reported as `InsufficientResources` at allocation.
    fn open(&mut self, format: PcmFormat) -> Result<()>;

    /// # Errors
    ///
    /// I/O failures of the underlying device or file.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Called at end of stream.
    ///
    /// # Errors
    ///
    /// I/O failures of the underlying device or file.
    fn drain(&mut self) -> Result<()>;

    fn close(&mut self);
}

impl<T: PcmSink + ?Sized> PcmSink for Box<T> {
    fn open(&mut self, format: PcmFormat) -> Result<()> {
        (**self).open(format)
    }

    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        (**self).write(pcm)
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Discards everything, counting bytes.
#[derive(Debug, Default)]
pub struct NullSink {
    pub bytes: u64,
}

impl PcmSink for NullSink {
    fn open(&mut self, _format: PcmFormat) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.bytes += pcm.len() as u64;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

const WAV_HEADER_LEN: u32 = 44;

/// Writes a canonical 44-byte-header WAV file. The size fields are patched
/// on every drain and on close.
#[derive(Debug)]
pub struct WavFileSink {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    data_len: u32,
}

impl WavFileSink {
    pub const fn new(path: PathBuf) -> Self {
        Self { path, file: None, data_len: 0 }
    }

    fn write_header(w: &mut impl Write, format: PcmFormat, data_len: u32) -> std::io::Result<()> {
        let block_align = format.channels * format.bits_per_sample / 8;
        w.write_all(b"RIFF")?;
        w.write_all(&(WAV_HEADER_LEN - 8 + data_len).to_le_bytes())?;
        w.write_all(b"WAVEfmt ")?;
        w.write_all(&16u32.to_le_bytes())?;
        w.write_all(&1u16.to_le_bytes())?;
        w.write_all(&u16::try_from(format.channels).unwrap_or(2).to_le_bytes())?;
        w.write_all(&format.sample_rate.to_le_bytes())?;
        w.write_all(&(format.sample_rate * block_align).to_le_bytes())?;
        w.write_all(&u16::try_from(block_align).unwrap_or(4).to_le_bytes())?;
        w.write_all(&u16::try_from(format.bits_per_sample).unwrap_or(16).to_le_bytes())?;
        w.write_all(b"data")?;
        w.write_all(&data_len.to_le_bytes())
    }

    fn patch_sizes(&mut self) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.flush()?;
        let f = file.get_mut();
        f.seek(SeekFrom::Start(4))?;
        f.write_all(&(WAV_HEADER_LEN - 8 + self.data_len).to_le_bytes())?;
        f.seek(SeekFrom::Start(40))?;
        f.write_all(&self.data_len.to_le_bytes())?;
        f.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

impl PcmSink for WavFileSink {
    fn open(&mut self, format: PcmFormat) -> Result<()> {
        let mut w = BufWriter::new(File::create(&self.path)?);
        Self::write_header(&mut w, format, 0)?;
        self.file = Some(w);
        self.data_len = 0;
        tracing::info!(path = %self.path.display(), ?format, "WAV sink opened");
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(PortKitError::Runtime("WAV sink is not open".to_string()));
        };
        file.write_all(pcm)?;
        self.data_len = self.data_len.saturating_add(u32::try_from(pcm.len()).unwrap_or(u32::MAX));
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.patch_sizes()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.patch_sizes() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to finalize WAV file");
        }
        self.file = None;
    }
}

#[derive(Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Null,
    Wav {
        path: PathBuf,
    },
}

const fn default_input_buffer_size() -> usize {
    16384
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct PcmRendererConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,
}

impl Default for PcmRendererConfig {
    fn default() -> Self {
        Self { sink: SinkConfig::default(), input_buffer_size: default_input_buffer_size() }
    }
}

pub struct PcmRendererProcessor<S> {
    sink: S,
    input: HeaderSlot,
    format: Option<PcmFormat>,
    port_disabled: bool,
}

impl<S: PcmSink> PcmRendererProcessor<S> {
    pub const fn new(sink: S) -> Self {
        Self { sink, input: HeaderSlot::new(INPUT_PORT), format: None, port_disabled: false }
    }

    pub fn ports(config: &PcmRendererConfig) -> Vec<Box<dyn Port>> {
        vec![Box::new(AudioPort::pcm(
            INPUT_PORT,
            Direction::Input,
            config.input_buffer_size,
            PcmParams::default(),
        ))]
    }

    pub const fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    fn read_format(kernel: &dyn Kernel) -> Result<PcmFormat> {
        match kernel.get_parameter(INPUT_PORT, ParamIndex::AudioPcm)? {
            Param::Pcm(pcm) => Ok(PcmFormat::from(&pcm)),
            other => Err(PortKitError::BadParameter(format!("unexpected {} block", other.index()))),
        }
    }

    fn open_sink(&mut self, kernel: &dyn Kernel) -> Result<()> {
        let format = Self::read_format(kernel)?;
        self.sink.open(format).map_err(|e| {
            tracing::error!(
                component = %kernel.component_name(),
                error = %e,
                "Unable to open the PCM sink"
            );
            PortKitError::InsufficientResources(format!("unable to open the PCM sink: {e}"))
        })?;
        tracing::info!(
            component = %kernel.component_name(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "PCM sink opened"
        );
        self.format = Some(format);
        Ok(())
    }
}

impl<S: PcmSink> Processor for PcmRendererProcessor<S> {
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.open_sink(kernel)
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        self.sink.close();
        self.format = None;
        Ok(())
    }

    fn prepare_to_transfer(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        Ok(())
    }

    fn transfer_and_process(&mut self, _kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        Ok(())
    }

    fn stop_and_return(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.input.release(kernel)?;
        Ok(())
    }

    fn buffers_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        if self.port_disabled {
            return Ok(());
        }
        while let Some(hdr) = self.input.claim(kernel)? {
            if hdr.filled_len > 0 {
                self.sink.write(hdr.payload())?;
            }
            let eos = hdr.flags.contains(BufferFlags::EOS);
            hdr.consume(hdr.filled_len);
            hdr.offset = 0;
            self.input.release(kernel)?;
            if eos {
                self.sink.drain()?;
                tracing::debug!(component = %kernel.component_name(), "End of stream rendered");
                kernel.issue_event(ComponentEvent::eos(INPUT_PORT));
            }
        }
        Ok(())
    }

    fn port_flush(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.input.release(kernel)?;
        Ok(())
    }

    fn port_disable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.port_disabled = true;
        self.input.release(kernel)?;
        Ok(())
    }

    fn port_enable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.port_disabled = false;
        let format = Self::read_format(kernel)?;
        if self.format.is_some_and(|f| f != format) {
            tracing::info!(
                component = %kernel.component_name(),
                ?format,
                "Reopening sink with new format"
            );
            self.sink.close();
            self.open_sink(kernel)?;
        }
        Ok(())
    }
}

pub fn register_pcm_renderer(registry: &mut ComponentRegistry) {
    use schemars::schema_for;

    registry.register(
        "portkit.pcm_renderer",
        &["audio_renderer.pcm"],
        |role, params| {
            let config: PcmRendererConfig = config_helpers::parse_config_optional(params)?;
            let ports = PcmRendererProcessor::<Box<dyn PcmSink>>::ports(&config);
            let sink: Box<dyn PcmSink> = match &config.sink {
                SinkConfig::Null => Box::new(NullSink::default()),
                SinkConfig::Wav { path } => Box::new(WavFileSink::new(path.clone())),
            };
            Ok(ComponentParts::new(role, ports, Box::new(PcmRendererProcessor::new(sink))))
        },
        serde_json::to_value(schema_for!(PcmRendererConfig)).unwrap_or_default(),
        "Renders PCM to a WAV file or discards it.",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockKernel, RecordingSink};
    use portkit_core::{BufferHeader, ErrorCode};

    fn kernel(rate: u32) -> MockKernel {
        let pcm = PcmParams { sample_rate: rate, ..Default::default() };
        MockKernel::new("renderer").with_param(INPUT_PORT, Param::Pcm(pcm))
    }

    #[test]
    fn test_renders_and_signals_eos() {
        let mut k = kernel(44100);
        let sink = RecordingSink::new();
        let mut p = PcmRendererProcessor::new(sink.clone());
        p.allocate_resources(&mut k, 0).unwrap();
        assert_eq!(sink.format().unwrap().sample_rate, 44100);

        k.offer_payload(INPUT_PORT, &[1, 2, 3, 4]);
        let mut last = BufferHeader::new(50, 8);
        last.append(&[5, 6]);
        last.flags.insert(BufferFlags::EOS);
        k.offer_header(INPUT_PORT, last);
        p.buffers_ready(&mut k).unwrap();

        assert_eq!(sink.bytes(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(sink.drained(), 1);
        assert_eq!(k.events, vec![ComponentEvent::eos(INPUT_PORT)]);
        assert_eq!(k.take_released(INPUT_PORT).len(), 2);
    }

    #[test]
    fn test_enable_reopens_on_new_format() {
        let mut k = kernel(48000);
        let sink = RecordingSink::new();
        let mut p = PcmRendererProcessor::new(sink.clone());
        p.allocate_resources(&mut k, 0).unwrap();

        p.port_disable(&mut k, 0).unwrap();
        k.offer_payload(INPUT_PORT, &[1, 2]);
        p.buffers_ready(&mut k).unwrap();
        assert!(sink.bytes().is_empty());

        let pcm = PcmParams { sample_rate: 22050, ..Default::default() };
        k.set_parameter_internal(INPUT_PORT, Param::Pcm(pcm)).unwrap();
        p.port_enable(&mut k, 0).unwrap();
        assert_eq!(sink.format().unwrap().sample_rate, 22050);
        assert_eq!(p.format().unwrap().sample_rate, 22050);

        p.buffers_ready(&mut k).unwrap();
        assert_eq!(sink.bytes(), vec![1, 2]);
    }

    #[test]
    fn test_sink_failure_is_insufficient_resources() {
        let mut k = kernel(48000);
        let mut sink = RecordingSink::new();
        sink.fail_open = true;
        let mut p = PcmRendererProcessor::new(sink);
        assert_eq!(
            p.allocate_resources(&mut k, 0).unwrap_err().code(),
            ErrorCode::InsufficientResources
        );
    }

    #[test]
    fn test_wav_sink_patches_sizes() {
        let path = std::env::temp_dir().join(format!("portkit-wav-{}.wav", std::process::id()));
        let mut sink = WavFileSink::new(path.clone());
        sink.open(PcmFormat { sample_rate: 8000, channels: 1, bits_per_sample: 16 }).unwrap();
        sink.write(&[0; 10]).unwrap();
        sink.close();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bytes.len(), 54);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 46);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 8000);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 10);
    }
}
