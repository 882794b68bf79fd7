// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! WebM container source.
//!
//! Streams a single WebM resource named by the component's content URI.
//! Unlike the playlist sources, a dropped connection is retried after the
//! reconnect timeout, and the container type is identified by sniffing the
//! first payload bytes through a [`ContainerProbe`].

use std::time::Duration;

use portkit_core::port::{AudioPort, Port};
use portkit_core::types::AudioCoding;
use portkit_core::{
    config_helpers, BufferHeader, ComponentParts, ComponentRegistry, Direction, HeaderSlot, Kernel,
    Param, ParamIndex, PortKitError, Processor, Result,
};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::sources::{issue_auto_detect_events, port_coding, set_port_coding, SOURCE_PORT};
use crate::transfer::{cache_bytes, TransferCallbacks, TransferState, TransportFactory, UrlTransfer};

/// EBML header magic that opens every Matroska/WebM file.
pub const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Identifies a container from its leading bytes.
pub trait ContainerProbe: Send + Sync {
    fn probe(&self, data: &[u8]) -> Option<AudioCoding>;
}

/// Recognizes WebM by its EBML magic.
#[derive(Debug, Default, Clone, Copy)]
pub struct EbmlProbe;

impl ContainerProbe for EbmlProbe {
    fn probe(&self, data: &[u8]) -> Option<AudioCoding> {
        data.starts_with(&EBML_MAGIC).then_some(AudioCoding::Webm)
    }
}

const fn default_bitrate_kbps() -> u32 {
    1024
}

const fn default_cache_seconds() -> u32 {
    5
}

const fn default_min_buffer_size() -> usize {
    8192
}

const fn default_reconnect_timeout_ms() -> u64 {
    3000
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct WebmSourceConfig {
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_cache_seconds")]
    pub cache_seconds: u32,
    #[serde(default = "default_min_buffer_size")]
    pub min_buffer_size: usize,
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
}

impl Default for WebmSourceConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: default_bitrate_kbps(),
            cache_seconds: default_cache_seconds(),
            min_buffer_size: default_min_buffer_size(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
        }
    }
}

struct DemuxSession {
    out: HeaderSlot,
    port_disabled: bool,
    flushed: bool,
    auto_detect_on: bool,
    coding: AudioCoding,
}

struct DemuxCallbacks<'a> {
    session: &'a mut DemuxSession,
    probe: &'a dyn ContainerProbe,
    kernel: &'a mut dyn Kernel,
}

impl TransferCallbacks for DemuxCallbacks<'_> {
    fn kernel(&mut self) -> &mut dyn Kernel {
        self.kernel
    }

    fn buffer_emptied(&mut self) -> Option<&mut BufferHeader> {
        if self.session.port_disabled {
            return None;
        }
        self.session.out.claim(self.kernel).ok().flatten()
    }

    fn buffer_filled(&mut self) {
        if let Err(e) = self.session.out.release(self.kernel) {
            tracing::warn!(
                component = %self.kernel.component_name(),
                error = %e,
                "Failed to release output header"
            );
        }
    }

    fn header_available(&mut self, _header: &[u8]) {}

    fn data_available(&mut self, data: &[u8]) -> bool {
        if !self.session.auto_detect_on || data.is_empty() {
            return false;
        }
        self.session.auto_detect_on = false;
        if let Some(coding) = self.probe.probe(data) {
            self.session.coding = coding;
            if let Err(e) = set_port_coding(self.kernel, SOURCE_PORT, coding) {
                tracing::warn!(
                    component = %self.kernel.component_name(),
                    error = %e,
                    "Failed to set port coding"
                );
            }
        }
        issue_auto_detect_events(self.kernel, SOURCE_PORT, self.session.coding);
        true
    }

    fn connection_lost(&mut self) -> bool {
        true
    }
}

pub struct WebmSourceProcessor {
    config: WebmSourceConfig,
    probe: Box<dyn ContainerProbe>,
    transport_factory: TransportFactory,
    transfer: Option<UrlTransfer>,
    uri: Option<String>,
    uri_changed: bool,
    session: DemuxSession,
}

impl WebmSourceProcessor {
    pub fn new(
        config: WebmSourceConfig,
        probe: Box<dyn ContainerProbe>,
        transport_factory: TransportFactory,
    ) -> Self {
        Self {
            config,
            probe,
            transport_factory,
            transfer: None,
            uri: None,
            uri_changed: false,
            session: DemuxSession {
                out: HeaderSlot::new(SOURCE_PORT),
                port_disabled: false,
                flushed: false,
                auto_detect_on: false,
                coding: AudioCoding::Unused,
            },
        }
    }

    pub fn ports(config: &WebmSourceConfig) -> Vec<Box<dyn Port>> {
        vec![Box::new(AudioPort::generic(
            SOURCE_PORT,
            Direction::Output,
            config.min_buffer_size,
            AudioCoding::AutoDetect,
        ))]
    }

    fn with_transfer<F>(&mut self, kernel: &mut dyn Kernel, f: F) -> Result<()>
    where
        F: FnOnce(&mut UrlTransfer, &mut dyn TransferCallbacks) -> Result<()>,
    {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(());
        };
        let mut cb =
            DemuxCallbacks { session: &mut self.session, probe: self.probe.as_ref(), kernel };
        f(transfer, &mut cb)
    }

    fn obtain_uri(kernel: &dyn Kernel) -> Result<String> {
        let Param::ContentUri(uri) = kernel.get_config(ParamIndex::ContentUri)? else {
            return Err(PortKitError::BadParameter("content URI block expected".to_string()));
        };
        tracing::info!(component = %kernel.component_name(), %uri, "Content URI");
        let lower = uri.get(..8).unwrap_or(uri.as_str()).to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(PortKitError::ContentUri(format!("not an http(s) URL: '{uri}'")));
        }
        Ok(uri)
    }

    /// Re-reads the content URI, taking effect on the next start.
    ///
    /// # Errors
    ///
    /// `ContentUri` for a non-http(s) URI.
    pub fn reload_uri(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        let uri = Self::obtain_uri(kernel)?;
        let disabled = self.session.port_disabled;
        self.with_transfer(kernel, |t, cb| t.set_uri(&uri, cb))?;
        self.uri = Some(uri);
        self.uri_changed = disabled;
        Ok(())
    }
}

impl Processor for WebmSourceProcessor {
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        let uri = Self::obtain_uri(kernel)?;
        let transfer = UrlTransfer::init(
            kernel.component_name(),
            &uri,
            self.config.min_buffer_size,
            Duration::from_millis(self.config.reconnect_timeout_ms),
            (self.transport_factory)(),
        )?;
        self.uri = Some(uri);
        self.transfer = Some(transfer);
        Ok(())
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        self.transfer = None;
        self.uri = None;
        Ok(())
    }

    fn prepare_to_transfer(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        let cache = cache_bytes(self.config.bitrate_kbps, self.config.cache_seconds);
        self.with_transfer(kernel, |t, cb| {
            t.cancel(cb);
            t.set_internal_buffer_size(cache);
            Ok(())
        })?;
        self.session.coding = port_coding(kernel, SOURCE_PORT)?;
        self.session.auto_detect_on = self.session.coding == AudioCoding::AutoDetect;
        Ok(())
    }

    fn transfer_and_process(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        if self.session.auto_detect_on {
            return self.with_transfer(kernel, |t, cb| t.start(cb));
        }
        Ok(())
    }

    fn stop_and_return(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.with_transfer(kernel, |t, cb| {
            t.pause(cb);
            t.flush_buffer();
            Ok(())
        })?;
        self.session.out.release(kernel)?;
        Ok(())
    }

    fn buffers_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        let resume = std::mem::take(&mut self.session.flushed) && !self.session.port_disabled;
        self.with_transfer(kernel, |t, cb| {
            if resume {
                t.unpause(cb)?;
            }
            t.on_buffers_ready(cb)
        })
    }

    fn io_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.with_transfer(kernel, |t, cb| t.on_io_ready(cb))
    }

    fn timer_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        self.with_transfer(kernel, |t, cb| t.on_timer_ready(cb))
    }

    fn port_flush(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        let mut paused = false;
        self.with_transfer(kernel, |t, cb| {
            paused = matches!(t.state(), TransferState::Connecting | TransferState::Transferring);
            t.pause(cb);
            t.flush_buffer();
            Ok(())
        })?;
        // Resumed by the next buffers_ready.
        self.session.flushed |= paused;
        self.session.out.release(kernel)?;
        Ok(())
    }

    fn port_disable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.session.port_disabled = true;
        self.session.flushed = false;
        self.with_transfer(kernel, |t, cb| {
            t.pause(cb);
            Ok(())
        })?;
        self.session.out.release(kernel)?;
        Ok(())
    }

    fn port_enable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        if !self.session.port_disabled {
            return Ok(());
        }
        self.session.port_disabled = false;
        if self.uri_changed {
            self.uri_changed = false;
            self.with_transfer(kernel, |t, cb| t.start(cb))
        } else {
            self.with_transfer(kernel, |t, cb| t.unpause(cb))
        }
    }
}

pub fn register_webm_source(registry: &mut ComponentRegistry) {
    #[cfg(feature = "http")]
    {
        use schemars::schema_for;

        registry.register(
            "portkit.container_source.webm",
            &["container_demuxer_source.webm"],
            |role, params| {
                let config: WebmSourceConfig = config_helpers::parse_config_optional(params)?;
                let ports = WebmSourceProcessor::ports(&config);
                let processor = WebmSourceProcessor::new(
                    config,
                    Box::new(EbmlProbe),
                    crate::transfer::default_transport_factory(),
                );
                Ok(ComponentParts::new(role, ports, Box::new(processor)))
            },
            serde_json::to_value(schema_for!(WebmSourceConfig)).unwrap_or_default(),
            "Streams a WebM resource over HTTP, reconnecting on connection loss.",
        );
    }
    #[cfg(not(feature = "http"))]
    let _ = registry;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::{MockKernel, ScriptedTransport};
    use portkit_core::{ComponentEvent, ErrorCode, PortDefinition, PortFormat};

    fn kernel(uri: &str) -> MockKernel {
        let mut k = MockKernel::new("webm_source")
            .with_config(Param::ContentUri(uri.to_string()))
            .with_param(
                SOURCE_PORT,
                Param::PortDefinition(PortDefinition::new(
                    SOURCE_PORT,
                    Direction::Output,
                    8,
                    PortFormat::Audio { coding: AudioCoding::AutoDetect },
                )),
            );
        k.offer(SOURCE_PORT, 4, 8);
        k
    }

    fn processor(transport: &ScriptedTransport) -> WebmSourceProcessor {
        let transport = transport.clone();
        let factory: TransportFactory = Arc::new(move || Box::new(transport.clone()));
        let config =
            WebmSourceConfig { cache_seconds: 0, min_buffer_size: 8, ..Default::default() };
        WebmSourceProcessor::new(config, Box::new(EbmlProbe), factory)
    }

    #[test]
    fn test_ebml_probe() {
        assert_eq!(EbmlProbe.probe(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]), Some(AudioCoding::Webm));
        assert_eq!(EbmlProbe.probe(b"OggS"), None);
        assert_eq!(EbmlProbe.probe(&[0x1A]), None);
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let transport = ScriptedTransport::new();
        let mut k = kernel("HTTPS://cdn.example.com/clip.webm");
        processor(&transport).allocate_resources(&mut k, 0).unwrap();

        let mut k = kernel("file:///tmp/clip.webm");
        let err = processor(&transport).allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ContentUriError);
    }

    #[test]
    fn test_detects_webm_from_first_bytes() {
        let transport = ScriptedTransport::new();
        let mut p = processor(&transport);
        let mut k = kernel("http://cdn.example.com/clip.webm");
        p.allocate_resources(&mut k, 0).unwrap();
        p.prepare_to_transfer(&mut k, 0).unwrap();
        p.transfer_and_process(&mut k, 0).unwrap();

        transport.push_data(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81]);
        p.io_ready(&mut k).unwrap();
        assert_eq!(k.events[0], ComponentEvent::PortFormatDetected { port: SOURCE_PORT });
        assert_eq!(port_coding(&k, SOURCE_PORT).unwrap(), AudioCoding::Webm);
        assert_eq!(p.transfer.as_ref().unwrap().state(), TransferState::Paused);
    }

    #[test]
    fn test_unrecognized_container_is_reported() {
        let transport = ScriptedTransport::new();
        let mut p = processor(&transport);
        let mut k = kernel("http://cdn.example.com/clip.webm");
        p.allocate_resources(&mut k, 0).unwrap();
        p.prepare_to_transfer(&mut k, 0).unwrap();
        p.transfer_and_process(&mut k, 0).unwrap();

        transport.push_data(b"OggS\x00\x02");
        p.io_ready(&mut k).unwrap();
        assert_eq!(
            k.events,
            vec![ComponentEvent::Error {
                code: ErrorCode::FormatNotDetected,
                port: Some(SOURCE_PORT),
            }]
        );
    }

    #[test]
    fn test_connection_loss_schedules_reconnect() {
        let transport = ScriptedTransport::new();
        let mut p = processor(&transport);
        let mut k = kernel("http://cdn.example.com/clip.webm");
        p.allocate_resources(&mut k, 0).unwrap();
        p.prepare_to_transfer(&mut k, 0).unwrap();
        p.transfer_and_process(&mut k, 0).unwrap();

        transport.push_lost("reset by peer");
        p.io_ready(&mut k).unwrap();
        assert_eq!(k.timer, Some(Duration::from_secs(3)));
        p.timer_ready(&mut k).unwrap();
        assert_eq!(transport.opened().len(), 2);
    }

    #[test]
    fn test_flush_while_executing_resumes_on_next_buffers() {
        let transport = ScriptedTransport::new();
        let mut p = processor(&transport);
        let mut k = kernel("http://cdn.example.com/clip.webm");
        set_port_coding(&mut k, SOURCE_PORT, AudioCoding::Webm).unwrap();
        p.allocate_resources(&mut k, 0).unwrap();
        p.prepare_to_transfer(&mut k, 0).unwrap();
        p.transfer_and_process(&mut k, 0).unwrap();
        p.buffers_ready(&mut k).unwrap();

        transport.push_data(b"12345678");
        p.io_ready(&mut k).unwrap();
        assert_eq!(k.take_released(SOURCE_PORT).len(), 1);

        p.port_flush(&mut k, 0).unwrap();
        assert_eq!(p.transfer.as_ref().unwrap().state(), TransferState::Paused);

        transport.push_data(b"abcdefgh");
        p.buffers_ready(&mut k).unwrap();
        p.io_ready(&mut k).unwrap();
        assert_eq!(p.transfer.as_ref().unwrap().state(), TransferState::Transferring);
        assert_eq!(k.released_payload(SOURCE_PORT), b"abcdefgh");
    }

    #[test]
    fn test_reload_while_disabled_restarts_on_enable() {
        let transport = ScriptedTransport::new();
        let mut p = processor(&transport);
        let mut k = kernel("http://cdn.example.com/a.webm");
        p.allocate_resources(&mut k, 0).unwrap();
        p.prepare_to_transfer(&mut k, 0).unwrap();
        p.transfer_and_process(&mut k, 0).unwrap();

        p.port_disable(&mut k, 0).unwrap();
        k.set_config(Param::ContentUri("http://cdn.example.com/b.webm".to_string()));
        p.reload_uri(&mut k).unwrap();
        p.port_enable(&mut k, 0).unwrap();
        assert_eq!(transport.opened().last().unwrap().as_str(), "http://cdn.example.com/b.webm");
    }
}
