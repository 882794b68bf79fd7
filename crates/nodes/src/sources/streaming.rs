// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP source for playlist-driven streaming services.
//!
//! The processor pulls track URLs from a [`ContentProvider`], streams each
//! one through a [`UrlTransfer`] and publishes the track's descriptive fields
//! through the kernel's metadata store. The stream's audio coding is taken
//! from the `Content-Type` response header, and the `Content-Length` header
//! drives end-of-stream marking.

use std::time::Duration;

use portkit_core::params::{PlaylistConfig, PlaylistKind, SessionConfig};
use portkit_core::port::{AudioPort, Port};
use portkit_core::types::AudioCoding;
use portkit_core::{
    config_helpers, BufferFlags, BufferHeader, ComponentEvent, ComponentParts, ComponentRegistry,
    Direction, HeaderSlot, Kernel, Param, ParamIndex, PortKitError, Processor, Result,
};
use schemars::JsonSchema;
use serde::Deserialize;

use super::headers::{coding_from_content_type, split_header};
use super::provider::{CatalogTrack, ContentProvider, ServiceFlavour};
use super::{issue_auto_detect_events, port_coding, set_port_coding, SOURCE_PORT};
use crate::transfer::{cache_bytes, TransferCallbacks, TransferState, TransportFactory, UrlTransfer};

const fn default_bitrate_kbps() -> u32 {
    320
}

const fn default_cache_seconds() -> u32 {
    10
}

const fn default_min_buffer_size() -> usize {
    8192
}

const fn default_reconnect_timeout_ms() -> u64 {
    3000
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct StreamingSourceConfig {
    /// Nominal stream bitrate, used to size the pre-buffering cache.
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    /// Seconds of audio to buffer before the first header is filled.
    #[serde(default = "default_cache_seconds")]
    pub cache_seconds: u32,
    /// Size of the output port buffers, in bytes.
    #[serde(default = "default_min_buffer_size")]
    pub min_buffer_size: usize,
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    /// Tracks served by the built-in catalog provider.
    #[serde(default)]
    pub catalog: Vec<CatalogTrack>,
}

impl Default for StreamingSourceConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: default_bitrate_kbps(),
            cache_seconds: default_cache_seconds(),
            min_buffer_size: default_min_buffer_size(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            catalog: Vec::new(),
        }
    }
}

/// State the transfer callbacks operate on.
#[derive(Debug)]
struct SourceSession {
    out: HeaderSlot,
    eos: bool,
    port_disabled: bool,
    /// A flush paused the transfer; the next `buffers_ready` resumes it.
    flushed: bool,
    auto_detect_on: bool,
    coding: AudioCoding,
    content_length: Option<u64>,
    bytes_before_eos: Option<u64>,
}

impl SourceSession {
    const fn new() -> Self {
        Self {
            out: HeaderSlot::new(SOURCE_PORT),
            eos: false,
            port_disabled: false,
            flushed: false,
            auto_detect_on: false,
            coding: AudioCoding::Unused,
            content_length: None,
            bytes_before_eos: None,
        }
    }

    /// Releases the held output header, marking EOS once the announced
    /// content length has been delivered.
    fn release_output(&mut self, kernel: &mut dyn Kernel) -> Result<()> {
        let Some(hdr) = self.out.get_mut() else {
            return Ok(());
        };
        if let Some(remaining) = self.bytes_before_eos {
            let filled = hdr.filled_len as u64;
            if remaining > filled {
                self.bytes_before_eos = Some(remaining - filled);
            } else {
                self.bytes_before_eos = None;
                self.eos = true;
            }
        }
        if self.eos {
            self.eos = false;
            hdr.flags.insert(BufferFlags::EOS);
            tracing::debug!(component = %kernel.component_name(), "End of track");
        }
        self.out.release(kernel)?;
        Ok(())
    }
}

struct SourceCallbacks<'a> {
    session: &'a mut SourceSession,
    kernel: &'a mut dyn Kernel,
}

impl TransferCallbacks for SourceCallbacks<'_> {
    fn kernel(&mut self) -> &mut dyn Kernel {
        self.kernel
    }

    fn buffer_emptied(&mut self) -> Option<&mut BufferHeader> {
        if self.session.port_disabled {
            return None;
        }
        match self.session.out.claim(self.kernel) {
            Ok(hdr) => hdr,
            Err(e) => {
                tracing::warn!(
                    component = %self.kernel.component_name(),
                    error = %e,
                    "Failed to claim output header"
                );
                None
            },
        }
    }

    fn buffer_filled(&mut self) {
        if let Err(e) = self.session.release_output(self.kernel) {
            tracing::warn!(
                component = %self.kernel.component_name(),
                error = %e,
                "Failed to release output header"
            );
        }
    }

    fn header_available(&mut self, header: &[u8]) {
        let Some((name, value)) = split_header(header) else {
            return;
        };
        if name.eq_ignore_ascii_case("content-type") {
            self.session.coding = coding_from_content_type(value);
            if let Err(e) = set_port_coding(self.kernel, SOURCE_PORT, self.session.coding) {
                tracing::warn!(
                    component = %self.kernel.component_name(),
                    error = %e,
                    "Failed to set port coding"
                );
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            match value.parse::<u64>() {
                Ok(len) => {
                    self.session.content_length = Some(len);
                    self.session.bytes_before_eos = Some(len);
                },
                Err(e) => {
                    tracing::error!(
                        component = %self.kernel.component_name(),
                        value,
                        "Bad content length: {e}"
                    );
                },
            }
        }
    }

    fn data_available(&mut self, data: &[u8]) -> bool {
        if self.session.auto_detect_on && !data.is_empty() {
            self.session.auto_detect_on = false;
            issue_auto_detect_events(self.kernel, SOURCE_PORT, self.session.coding);
            // Stay paused until the client has reconfigured the graph.
            return true;
        }
        false
    }

    fn connection_lost(&mut self) -> bool {
        tracing::debug!(
            component = %self.kernel.component_name(),
            bytes_before_eos = ?self.session.bytes_before_eos,
            "Connection lost, ending track"
        );
        self.session.eos = true;
        false
    }
}

pub struct StreamingSourceProcessor<P> {
    flavour: ServiceFlavour,
    config: StreamingSourceConfig,
    provider: P,
    transport_factory: TransportFactory,
    transfer: Option<UrlTransfer>,
    uri: Option<String>,
    uri_changed: bool,
    cache_bytes: usize,
    session: SourceSession,
}

impl<P: ContentProvider> StreamingSourceProcessor<P> {
    pub fn new(
        flavour: ServiceFlavour,
        config: StreamingSourceConfig,
        provider: P,
        transport_factory: TransportFactory,
    ) -> Self {
        let cache_bytes = cache_bytes(config.bitrate_kbps, config.cache_seconds);
        Self {
            flavour,
            config,
            provider,
            transport_factory,
            transfer: None,
            uri: None,
            uri_changed: false,
            cache_bytes,
            session: SourceSession::new(),
        }
    }

    /// The port layout of a streaming source.
    pub fn ports(config: &StreamingSourceConfig) -> Vec<Box<dyn Port>> {
        vec![Box::new(AudioPort::generic(
            SOURCE_PORT,
            Direction::Output,
            config.min_buffer_size,
            AudioCoding::AutoDetect,
        ))]
    }

    pub fn current_uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub const fn content_length(&self) -> Option<u64> {
        self.session.content_length
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn with_transfer<F>(&mut self, kernel: &mut dyn Kernel, f: F) -> Result<()>
    where
        F: FnOnce(&mut UrlTransfer, &mut dyn TransferCallbacks) -> Result<()>,
    {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(());
        };
        let mut cb = SourceCallbacks { session: &mut self.session, kernel };
        f(transfer, &mut cb)
    }

    fn read_session(&self, kernel: &dyn Kernel) -> Result<SessionConfig> {
        match kernel.get_config(self.flavour.service.session_index())? {
            Param::Session(_, session) => Ok(session),
            other => Err(PortKitError::BadParameter(format!(
                "expected a session, got {}",
                other.index()
            ))),
        }
    }

    fn read_playlist(&self, kernel: &dyn Kernel) -> Result<PlaylistConfig> {
        match kernel.get_config(self.flavour.service.playlist_index())? {
            Param::Playlist(_, playlist) => Ok(playlist),
            other => Err(PortKitError::BadParameter(format!(
                "expected a playlist, got {}",
                other.index()
            ))),
        }
    }

    fn enqueue_playlist(&mut self, playlist: &PlaylistConfig) -> Result<()> {
        self.provider.set_playback_mode(playlist.shuffle);
        if playlist.kind == PlaylistKind::Unknown || !self.flavour.supports(playlist.kind) {
            return Err(PortKitError::BadParameter(format!(
                "{:?} does not support {:?} playlists",
                self.flavour.service, playlist.kind
            )));
        }
        self.provider
            .enqueue(playlist.kind, &playlist.name, playlist.unlimited_search)
            .map_err(|e| {
                PortKitError::InsufficientResources(format!("failed to enqueue playlist: {e}"))
            })
    }

    /// Moves one track forward (`skip > 0`) or back and publishes its metadata.
    fn obtain_next_url(&mut self, kernel: &mut dyn Kernel, skip: i32) -> Result<String> {
        let url = if skip > 0 { self.provider.next_url() } else { self.provider.prev_url() };
        let url = url.ok_or_else(|| {
            PortKitError::InsufficientResources("playlist has no more tracks".to_string())
        })?;
        tracing::trace!(component = %kernel.component_name(), %url, "Next URL");
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PortKitError::ContentUri(format!("not an http(s) URL: '{url}'")));
        }
        self.uri = Some(url.clone());
        self.update_metadata(kernel)?;
        Ok(url)
    }

    fn update_metadata(&self, kernel: &mut dyn Kernel) -> Result<()> {
        kernel.clear_metadata();
        if let Some(track) = self.provider.current_track() {
            kernel.store_metadata(&track.artist, &track.title)?;
            kernel.store_metadata("Album", &track.album)?;
            if !track.year.is_empty() && track.year != "0" {
                kernel.store_metadata("Year", &track.year)?;
            }
            kernel.store_metadata("Duration", &track.duration)?;
            kernel.store_metadata("Track", &track.track_number)?;
            if !track.total_tracks.is_empty() && track.total_tracks != "0" {
                kernel.store_metadata("Total tracks", &track.total_tracks)?;
            }
        }
        kernel.issue_event(ComponentEvent::IndexSettingChanged {
            port: None,
            index: ParamIndex::MetadataItem,
        });
        Ok(())
    }

    fn prepare_for_port_auto_detection(&mut self, kernel: &dyn Kernel) -> Result<()> {
        self.session.coding = port_coding(kernel, SOURCE_PORT)?;
        self.session.auto_detect_on = self.session.coding == AudioCoding::AutoDetect;
        tracing::trace!(
            component = %kernel.component_name(),
            auto_detect = self.session.auto_detect_on,
            "Prepared port auto-detection"
        );
        Ok(())
    }
}

impl<P: ContentProvider> Processor for StreamingSourceProcessor<P> {
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        let session = self.read_session(kernel)?;
        let playlist = self.read_playlist(kernel)?;
        self.provider.init(&session).map_err(|e| {
            PortKitError::InsufficientResources(format!(
                "failed to initialize {:?}: {e}",
                self.flavour.service
            ))
        })?;
        self.enqueue_playlist(&playlist)?;
        let url = self.obtain_next_url(kernel, 1)?;

        let mut transfer = UrlTransfer::init(
            kernel.component_name(),
            &url,
            self.config.min_buffer_size,
            Duration::from_millis(self.config.reconnect_timeout_ms),
            (self.transport_factory)(),
        )?;
        transfer.set_internal_buffer_size(self.cache_bytes);
        self.transfer = Some(transfer);
        tracing::info!(
            component = %kernel.component_name(),
            service = ?self.flavour.service,
            playlist = %playlist.name,
            cache_bytes = self.cache_bytes,
            "Streaming source allocated"
        );
        Ok(())
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        self.transfer = None;
        self.uri = None;
        self.uri_changed = false;
        Ok(())
    }

    fn prepare_to_transfer(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.session.eos = false;
        self.session.flushed = false;
        let cache = self.cache_bytes;
        self.with_transfer(kernel, |t, cb| {
            t.cancel(cb);
            t.set_internal_buffer_size(cache);
            Ok(())
        })?;
        self.prepare_for_port_auto_detection(kernel)
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
        self.session.release_output(kernel)
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
        self.session.flushed |= paused;
        self.session.release_output(kernel)
    }

    fn port_disable(&mut self, kernel: &mut dyn Kernel, _pid: u32) -> Result<()> {
        self.session.port_disabled = true;
        self.session.flushed = false;
        // Cached bytes survive so the stream picks up where it left off.
        self.with_transfer(kernel, |t, cb| {
            t.pause(cb);
            Ok(())
        })?;
        self.session.release_output(kernel)
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

    fn config_change(
        &mut self,
        kernel: &mut dyn Kernel,
        _pid: u32,
        index: ParamIndex,
    ) -> Result<()> {
        if index != ParamIndex::PlaylistSkip || self.transfer.is_none() {
            return Ok(());
        }
        let skip = match kernel.get_config(ParamIndex::PlaylistSkip)? {
            Param::PlaylistSkip(v) => v,
            other => {
                return Err(PortKitError::BadParameter(format!(
                    "unexpected {} block",
                    other.index()
                )));
            },
        };
        let url = self.obtain_next_url(kernel, if skip > 0 { 1 } else { -1 })?;
        self.session.bytes_before_eos = None;
        self.session.content_length = None;
        let disabled = self.session.port_disabled;
        self.with_transfer(kernel, |t, cb| {
            t.set_uri(&url, cb)?;
            if !disabled {
                t.start(cb)?;
            }
            Ok(())
        })?;
        if disabled {
            self.uri_changed = true;
        }
        tracing::info!(
            component = %kernel.component_name(),
            skip,
            %url,
            deferred = disabled,
            "Skipped track"
        );
        Ok(())
    }
}

/// Registers the streaming source under every service flavour role.
pub fn register_streaming_sources(registry: &mut ComponentRegistry) {
    #[cfg(feature = "http")]
    {
        use super::provider::{flavour_for_role, CatalogProvider, FLAVOURS};
        use schemars::schema_for;

        let roles: Vec<&str> = FLAVOURS.iter().map(|f| f.role).collect();
        registry.register(
            "portkit.audio_source.http",
            &roles,
            |role, params| {
                let flavour = *flavour_for_role(role).ok_or_else(|| {
                    PortKitError::BadParameter(format!("unknown source role '{role}'"))
                })?;
                let config: StreamingSourceConfig = config_helpers::parse_config_optional(params)?;
                let ports = StreamingSourceProcessor::<CatalogProvider>::ports(&config);
                let provider = CatalogProvider::new(config.catalog.clone());
                let processor = StreamingSourceProcessor::new(
                    flavour,
                    config,
                    provider,
                    crate::transfer::default_transport_factory(),
                );
                Ok(ComponentParts::new(role, ports, Box::new(processor)))
            },
            serde_json::to_value(schema_for!(StreamingSourceConfig)).unwrap_or_default(),
            "Streams playlist tracks from an HTTP service. \
             Detects the audio coding from the response headers and publishes track metadata.",
        );
    }
    #[cfg(not(feature = "http"))]
    let _ = registry;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sources::provider::{DEEZER, GMUSIC};
    use crate::test_utils::{FakeProvider, MockKernel, ScriptedTransport};
    use portkit_core::params::Service;
    use portkit_core::{ErrorCode, PortDefinition, PortFormat};

    const URLS: [&str; 3] = ["http://music/1.mp3", "http://music/2.mp3", "https://music/3.mp3"];

    fn kernel(coding: AudioCoding, kind: PlaylistKind) -> MockKernel {
        let mut k = MockKernel::new("http_source")
            .with_param(
                SOURCE_PORT,
                Param::PortDefinition(PortDefinition::new(
                    SOURCE_PORT,
                    Direction::Output,
                    4,
                    PortFormat::Audio { coding },
                )),
            )
            .with_config(Param::Session(Service::Gmusic, SessionConfig::default()))
            .with_config(Param::Playlist(
                Service::Gmusic,
                PlaylistConfig {
                    kind,
                    name: "jazz".to_string(),
                    shuffle: true,
                    unlimited_search: false,
                },
            ));
        k.offer(SOURCE_PORT, 4, 4);
        k
    }

    fn processor(
        provider: FakeProvider,
        transport: &ScriptedTransport,
    ) -> StreamingSourceProcessor<FakeProvider> {
        let transport = transport.clone();
        let factory: TransportFactory = Arc::new(move || Box::new(transport.clone()));
        let config =
            StreamingSourceConfig { min_buffer_size: 4, cache_seconds: 0, ..Default::default() };
        StreamingSourceProcessor::new(GMUSIC, config, provider, factory)
    }

    fn executing(
        coding: AudioCoding,
    ) -> (StreamingSourceProcessor<FakeProvider>, MockKernel, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let mut p = processor(FakeProvider::new(&URLS), &transport);
        let mut k = kernel(coding, PlaylistKind::Artist);
        p.allocate_resources(&mut k, SOURCE_PORT).unwrap();
        p.prepare_to_transfer(&mut k, SOURCE_PORT).unwrap();
        p.transfer_and_process(&mut k, SOURCE_PORT).unwrap();
        (p, k, transport)
    }

    fn transfer_state(p: &StreamingSourceProcessor<FakeProvider>) -> TransferState {
        p.transfer.as_ref().unwrap().state()
    }

    #[test]
    fn test_allocate_publishes_first_track_metadata() {
        let transport = ScriptedTransport::new();
        let mut p = processor(FakeProvider::new(&URLS), &transport);
        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Artist);
        p.allocate_resources(&mut k, SOURCE_PORT).unwrap();

        assert_eq!(p.current_uri(), Some(URLS[0]));
        assert_eq!(p.provider().shuffle, Some(true));
        assert_eq!(p.provider().enqueued, vec![(PlaylistKind::Artist, "jazz".to_string())]);
        assert_eq!(k.metadata_value("Artist 0"), Some("Title 0"));
        assert_eq!(k.metadata_value("Album"), Some("Album"));
        assert_eq!(k.metadata_value("Year"), None, "a zero year is not published");
        assert_eq!(k.metadata_value("Total tracks"), Some("3"));
        assert_eq!(
            k.events,
            vec![ComponentEvent::IndexSettingChanged {
                port: None,
                index: ParamIndex::MetadataItem,
            }]
        );
        assert!(transport.opened().is_empty(), "nothing is fetched before executing");
    }

    #[test]
    fn test_allocate_error_classification() {
        let transport = ScriptedTransport::new();

        let mut provider = FakeProvider::new(&URLS);
        provider.fail_init = true;
        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Artist);
        let err = processor(provider, &transport).allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientResources);

        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Unknown);
        let mut p = processor(FakeProvider::new(&URLS), &transport);
        let err = p.allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadParameter);

        let mut provider = FakeProvider::new(&URLS);
        provider.fail_enqueue = true;
        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Artist);
        let err = processor(provider, &transport).allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientResources);

        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Artist);
        let mut p = processor(FakeProvider::new(&[]), &transport);
        let err = p.allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientResources);

        let mut k = kernel(AudioCoding::AutoDetect, PlaylistKind::Artist);
        let err = processor(FakeProvider::new(&["ftp://music/1.mp3"]), &transport)
            .allocate_resources(&mut k, 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ContentUriError);
    }

    #[test]
    fn test_flavour_restricts_playlist_kinds() {
        let transport = ScriptedTransport::new();
        let factory: TransportFactory = Arc::new(move || Box::new(transport.clone()));
        let (config, provider) = (StreamingSourceConfig::default(), FakeProvider::new(&URLS));
        let mut p = StreamingSourceProcessor::new(DEEZER, config, provider, factory);
        let mut k = MockKernel::new("deezer")
            .with_config(Param::Session(Service::Deezer, SessionConfig::default()))
            .with_config(Param::Playlist(
                Service::Deezer,
                PlaylistConfig { kind: PlaylistKind::Station, ..Default::default() },
            ));
        let err = p.allocate_resources(&mut k, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadParameter);
    }

    #[test]
    fn test_auto_detection_pauses_before_filling() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        assert_eq!(transport.opened().len(), 1);
        k.events.clear();

        transport.push_header("content-type: audio/mpeg");
        transport.push_data(b"ID3\x04");
        p.io_ready(&mut k).unwrap();

        assert_eq!(transfer_state(&p), TransferState::Paused);
        assert!(k.released.is_empty(), "no header is filled before the client reacts");
        assert_eq!(
            k.events,
            vec![
                ComponentEvent::PortFormatDetected { port: SOURCE_PORT },
                ComponentEvent::PortSettingsChanged {
                    port: SOURCE_PORT,
                    index: ParamIndex::PortDefinition,
                },
            ]
        );
        let Some(Param::PortDefinition(def)) = k.param(SOURCE_PORT, ParamIndex::PortDefinition)
        else {
            panic!("port definition missing");
        };
        assert_eq!(def.format, PortFormat::Audio { coding: AudioCoding::Mp3 });

        // The client disables and re-enables the port once reconfigured.
        p.port_disable(&mut k, SOURCE_PORT).unwrap();
        p.port_enable(&mut k, SOURCE_PORT).unwrap();
        assert_eq!(transfer_state(&p), TransferState::Transferring);
        assert_eq!(k.released_payload(SOURCE_PORT), b"ID3\x04");
    }

    #[test]
    fn test_unknown_content_type_is_not_detected() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        k.events.clear();
        transport.push_header("Content-Type: text/html");
        transport.push_data(b"<html>");
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
    fn test_content_length_marks_eos() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        transport.push_header("Content-Length: 6");
        transport.push_header("Content-Type: audio/mpeg");
        transport.push_data(b"abcdef");
        p.io_ready(&mut k).unwrap();
        p.port_disable(&mut k, SOURCE_PORT).unwrap();
        p.port_enable(&mut k, SOURCE_PORT).unwrap();
        transport.push_finished();
        p.io_ready(&mut k).unwrap();

        assert_eq!(p.content_length(), Some(6));
        let released = k.take_released(SOURCE_PORT);
        let eos: Vec<bool> = released.iter().map(|h| h.flags.contains(BufferFlags::EOS)).collect();
        // 4 + 2 bytes; the second header completes the announced length.
        assert_eq!(released[0].payload(), b"abcd");
        assert_eq!(released[1].payload(), b"ef");
        assert_eq!(&eos[..2], &[false, true]);
        assert!(eos[2..].iter().all(|e| !e), "only one header carries EOS");
        assert_eq!(transfer_state(&p), TransferState::Idle);
    }

    #[test]
    fn test_lost_connection_ends_track_with_eos() {
        let (mut p, mut k, transport) = executing(AudioCoding::Mp3);
        p.buffers_ready(&mut k).unwrap();
        transport.push_data(b"xy");
        transport.push_lost("reset");
        p.io_ready(&mut k).unwrap();
        let released = k.take_released(SOURCE_PORT);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].payload(), b"xy");
        assert!(released[0].flags.contains(BufferFlags::EOS));
        assert!(k.timer.is_none(), "no reconnect is scheduled");
    }

    #[test]
    fn test_without_auto_detection_start_is_lazy() {
        let (mut p, mut k, transport) = executing(AudioCoding::Mp3);
        assert!(transport.opened().is_empty());
        assert_eq!(transfer_state(&p), TransferState::Cancelled);
        p.buffers_ready(&mut k).unwrap();
        assert_eq!(transport.opened().len(), 1);
    }

    #[test]
    fn test_skip_back_restarts_with_previous_track() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        k.events.clear();
        k.set_config(Param::PlaylistSkip(-1));
        p.config_change(&mut k, SOURCE_PORT, ParamIndex::PlaylistSkip).unwrap();

        assert_eq!(p.current_uri(), Some(URLS[2]));
        assert_eq!(transport.opened().last().unwrap().as_str(), URLS[2]);
        assert_eq!(transfer_state(&p), TransferState::Connecting);
        assert_eq!(k.metadata_value("Artist 2"), Some("Title 2"));
        assert_eq!(k.metadata_value("Year"), Some("1999"));
        assert!(k.events.contains(&ComponentEvent::IndexSettingChanged {
            port: None,
            index: ParamIndex::MetadataItem
        }));
    }

    #[test]
    fn test_skip_while_disabled_defers_restart() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        p.port_disable(&mut k, SOURCE_PORT).unwrap();
        k.set_config(Param::PlaylistSkip(2));
        p.config_change(&mut k, SOURCE_PORT, ParamIndex::PlaylistSkip).unwrap();
        assert_eq!(transport.opened().len(), 1, "restart waits for the port");
        assert_eq!(transfer_state(&p), TransferState::Cancelled);

        p.port_enable(&mut k, SOURCE_PORT).unwrap();
        assert_eq!(transport.opened().last().unwrap().as_str(), URLS[1]);
        assert_eq!(transfer_state(&p), TransferState::Connecting);
    }

    #[test]
    fn test_disable_keeps_cache_and_refuses_headers() {
        let (mut p, mut k, transport) = executing(AudioCoding::Mp3);
        p.buffers_ready(&mut k).unwrap();
        transport.push_data(b"ab");
        p.io_ready(&mut k).unwrap();
        assert!(p.session.out.is_held(), "partial header is held");

        p.port_disable(&mut k, SOURCE_PORT).unwrap();
        assert!(!p.session.out.is_held());
        assert_eq!(k.released_payload(SOURCE_PORT), b"ab");

        p.buffers_ready(&mut k).unwrap();
        assert!(!p.session.out.is_held(), "no claim while disabled");
    }

    #[test]
    fn test_flush_while_executing_resumes_on_next_buffers() {
        let (mut p, mut k, transport) = executing(AudioCoding::Mp3);
        p.buffers_ready(&mut k).unwrap();
        transport.push_data(b"abcd");
        p.io_ready(&mut k).unwrap();
        assert_eq!(k.take_released(SOURCE_PORT).len(), 1);

        p.port_flush(&mut k, SOURCE_PORT).unwrap();
        assert_eq!(transfer_state(&p), TransferState::Paused);

        transport.push_data(b"efgh");
        p.buffers_ready(&mut k).unwrap();
        p.io_ready(&mut k).unwrap();
        assert_eq!(transfer_state(&p), TransferState::Transferring);
        assert_eq!(k.released_payload(SOURCE_PORT), b"efgh");
    }

    #[test]
    fn test_flush_keeps_detection_pause() {
        let (mut p, mut k, transport) = executing(AudioCoding::AutoDetect);
        transport.push_header("Content-Type: audio/mpeg");
        transport.push_data(b"ab");
        p.io_ready(&mut k).unwrap();
        assert_eq!(transfer_state(&p), TransferState::Paused);

        p.port_flush(&mut k, SOURCE_PORT).unwrap();
        p.buffers_ready(&mut k).unwrap();
        assert_eq!(
            transfer_state(&p),
            TransferState::Paused,
            "only the client resumes a detection pause"
        );
    }

    #[test]
    fn test_stop_and_flush_release_everything() {
        let (mut p, mut k, transport) = executing(AudioCoding::Mp3);
        p.buffers_ready(&mut k).unwrap();
        transport.push_data(b"a");
        p.io_ready(&mut k).unwrap();
        p.port_flush(&mut k, SOURCE_PORT).unwrap();
        assert!(!p.session.out.is_held());
        assert_eq!(p.transfer.as_ref().unwrap().cached_bytes(), 0);

        p.stop_and_return(&mut k).unwrap();
        assert!(!p.session.out.is_held());
        p.deallocate_resources().unwrap();
        p.deallocate_resources().unwrap();
        assert!(p.transfer.is_none());
    }
}
