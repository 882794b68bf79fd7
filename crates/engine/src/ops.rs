// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Service graph orchestration.
//!
//! [`GraphOps`] loads the HTTP source alone, lets it detect the stream
//! coding, then builds the rest of the chain (decoder and PCM renderer)
//! around it. When the decoder discovers the real sample rate and channel
//! count, the decoder-to-renderer tunnel is reconfigured: disabled, given
//! the new parameters, and enabled again.

use std::sync::Arc;

use indexmap::IndexMap;
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use portkit_core::params::PcmParams;
use portkit_core::types::AudioCoding;
use portkit_core::{
    BufferFlags, Command, ComponentEvent, ComponentEventUpdate, ComponentRegistry, ComponentState,
    ErrorCode, Param, ParamIndex, PortFormat, PortKitError, Result,
};

use crate::graph::{ComponentId, Endpoint, Graph, TunnelId};
use crate::services::{codec_index, decoder_role, ServiceConfig, RENDERER_ROLE, SOURCE_COMPONENT};

/// Error codes that stop the graph.
pub const FATAL_ERRORS: [ErrorCode; 6] = [
    ErrorCode::InsufficientResources,
    ErrorCode::ContentUriError,
    ErrorCode::FormatNotDetected,
    ErrorCode::StreamCorruptFatal,
    ErrorCode::PortsNotCompatible,
    ErrorCode::Undefined,
];

// Positions in the component list.
const SOURCE: usize = 0;
const DECODER: usize = 1;
const RENDERER: usize = 2;

const SOURCE_PORT: u32 = 0;
const DECODER_INPUT_PORT: u32 = 0;
const DECODER_OUTPUT_PORT: u32 = 1;
const RENDERER_PORT: u32 = 0;

/// Source to decoder.
pub const FIRST_TUNNEL: usize = 0;
/// Decoder to renderer.
pub const SECOND_TUNNEL: usize = 1;

/// A component to instantiate.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub role: String,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSwitch {
    Enable,
    Disable,
}

/// What stopped the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub component: String,
    pub code: ErrorCode,
    pub port: Option<u32>,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: fatal error '{}'", self.component, self.code)?;
        if let Some(port) = self.port {
            write!(f, " on port {port}")?;
        }
        Ok(())
    }
}

pub struct GraphOps {
    registry: Arc<ComponentRegistry>,
    config: ServiceConfig,
    handles: Vec<ComponentId>,
    tunnels: Vec<TunnelId>,
    encoding: AudioCoding,
    renderer_pcm: PcmParams,
    metadata: IndexMap<String, String>,
    fatal: Option<FatalError>,
    tracks_played: u32,
    ops_counter: Counter<u64>,
}

impl GraphOps {
    pub fn new(registry: Arc<ComponentRegistry>, config: ServiceConfig) -> Self {
        let meter = global::meter("portkit_engine");
        Self {
            registry,
            config,
            handles: Vec::new(),
            tunnels: Vec::new(),
            encoding: AudioCoding::AutoDetect,
            renderer_pcm: PcmParams { port_index: RENDERER_PORT, ..Default::default() },
            metadata: IndexMap::new(),
            fatal: None,
            tracks_played: 0,
            ops_counter: meter
                .u64_counter("graph.operations")
                .with_description("Graph operations executed")
                .build(),
        }
    }

    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn source(&self) -> Option<ComponentId> {
        self.handles.get(SOURCE).copied()
    }

    pub fn decoder(&self) -> Option<ComponentId> {
        self.handles.get(DECODER).copied()
    }

    pub fn renderer(&self) -> Option<ComponentId> {
        self.handles.get(RENDERER).copied()
    }

    pub fn tunnels(&self) -> &[TunnelId] {
        &self.tunnels
    }

    pub const fn encoding(&self) -> AudioCoding {
        self.encoding
    }

    /// PCM block last pushed onto the renderer.
    pub const fn renderer_pcm(&self) -> &PcmParams {
        &self.renderer_pcm
    }

    /// Metadata of the current track, as last retrieved from the source.
    pub const fn metadata(&self) -> &IndexMap<String, String> {
        &self.metadata
    }

    pub const fn fatal_error(&self) -> Option<&FatalError> {
        self.fatal.as_ref()
    }

    pub const fn tracks_played(&self) -> u32 {
        self.tracks_played
    }

    fn count(&self, op: &'static str) {
        self.ops_counter.add(1, &[KeyValue::new("op", op)]);
    }

    fn handle(&self, pos: usize) -> Result<ComponentId> {
        self.handles
            .get(pos)
            .copied()
            .ok_or_else(|| PortKitError::Runtime(format!("component {pos} is not loaded")))
    }

    /// Loads the source, configures it and starts it with auto-detection on.
    ///
    /// # Errors
    ///
    /// The first failing operation's error. Fatal ones are also recorded.
    pub fn start(&mut self, graph: &mut Graph) -> Result<()> {
        let result = self.start_source(graph);
        if let Err(e) = &result {
            let id = self.source();
            self.fail(graph, id, e);
        }
        result
    }

    fn start_source(&mut self, graph: &mut Graph) -> Result<()> {
        let source = ComponentSpec {
            name: SOURCE_COMPONENT.to_string(),
            role: self.config.source_role()?.to_string(),
            params: Some(self.config.source_params()),
        };
        self.do_load(graph, &[source])?;
        self.do_configure(graph)?;
        let source = self.handle(SOURCE)?;
        self.do_enable_auto_detection(graph, source, SOURCE_PORT)?;
        self.do_loaded2idle(graph)?;
        self.do_idle2exe(graph)
    }

    /// Instantiates `components` in order and appends them to the chain.
    ///
    /// # Errors
    ///
    /// Whatever the registry reports.
    pub fn do_load(&mut self, graph: &mut Graph, components: &[ComponentSpec]) -> Result<()> {
        self.count("do_load");
        for spec in components {
            let id = graph.load(&self.registry, &spec.name, &spec.role, spec.params.as_ref())?;
            self.handles.push(id);
        }
        Ok(())
    }

    /// Pushes the session and playlist blocks onto the source.
    ///
    /// # Errors
    ///
    /// Whatever the source reports.
    pub fn do_configure(&mut self, graph: &mut Graph) -> Result<()> {
        self.count("do_configure");
        let source = self.handle(SOURCE)?;
        let service = self.config.service;
        graph.set_config(source, Param::Session(service, self.config.session.clone()))?;
        graph.set_config(source, Param::Playlist(service, self.config.playlist.clone()))
    }

    /// Asks `handle` to discover the coding of `port` from live bytes.
    ///
    /// # Errors
    ///
    /// `IncorrectStateOperation` unless the component is Loaded or the port
    /// disabled.
    pub fn do_enable_auto_detection(
        &mut self,
        graph: &mut Graph,
        handle: ComponentId,
        port: u32,
    ) -> Result<()> {
        self.count("do_enable_auto_detection");
        let mut def = graph.port_definition(handle, port)?;
        def.format = PortFormat::Audio { coding: AudioCoding::AutoDetect };
        graph.set_parameter(handle, port, Param::PortDefinition(def))
    }

    /// # Errors
    ///
    /// Whatever the component reports for the command.
    pub fn do_disable_comp_ports(
        &mut self,
        graph: &mut Graph,
        handle: ComponentId,
        port: u32,
    ) -> Result<()> {
        self.count("do_disable_comp_ports");
        graph.send_command(handle, Command::PortDisable(port))
    }

    /// Moves every Loaded component to Idle, source first.
    ///
    /// # Errors
    ///
    /// The first failing transition.
    pub fn do_loaded2idle(&mut self, graph: &mut Graph) -> Result<()> {
        self.count("do_loaded2idle");
        for id in self.handles.clone() {
            if graph.component(id)?.state() == ComponentState::Loaded {
                graph.send_command(id, Command::StateSet(ComponentState::Idle))?;
            }
        }
        Ok(())
    }

    /// Moves every Idle component to Executing, sink first so downstream is
    /// ready before data flows.
    ///
    /// # Errors
    ///
    /// The first failing transition.
    pub fn do_idle2exe(&mut self, graph: &mut Graph) -> Result<()> {
        self.count("do_idle2exe");
        for id in self.handles.clone().into_iter().rev() {
            if graph.component(id)?.state() == ComponentState::Idle {
                graph.send_command(id, Command::StateSet(ComponentState::Executing))?;
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `BadParameter` for an unknown tunnel, otherwise whatever the
    /// reconfiguration reports.
    pub fn do_reconfigure_tunnel(&mut self, graph: &mut Graph, tunnel_id: usize) -> Result<()> {
        self.count("do_reconfigure_tunnel");
        match tunnel_id {
            FIRST_TUNNEL => self.do_reconfigure_first_tunnel(graph),
            SECOND_TUNNEL => self.do_reconfigure_second_tunnel(graph),
            other => Err(PortKitError::BadParameter(format!("no tunnel {other}"))),
        }
    }

    /// The source detected a coding again (a new track). The decoder stays
    /// in place as long as it handles the new coding.
    fn do_reconfigure_first_tunnel(&mut self, graph: &mut Graph) -> Result<()> {
        self.switch_tunnel(graph, FIRST_TUNNEL, TunnelSwitch::Disable)?;
        let coding = self.get_encoding_type_from_source(graph)?;
        let decoder = self.handle(DECODER)?;
        let accepted = graph.port_definition(decoder, DECODER_INPUT_PORT)?.format;
        if accepted != (PortFormat::Audio { coding }) {
            return Err(PortKitError::PortsNotCompatible(format!(
                "decoder takes {accepted:?}, the source now produces {coding:?}"
            )));
        }
        self.switch_tunnel(graph, FIRST_TUNNEL, TunnelSwitch::Enable)
    }

    /// Carries the decoded rate and channel count over to the renderer.
    fn do_reconfigure_second_tunnel(&mut self, graph: &mut Graph) -> Result<()> {
        let (channels, rate, encoding) = self.get_channels_and_rate_from_decoder(graph)?;
        let renderer = self.handle(RENDERER)?;
        if let Param::Pcm(current) =
            graph.get_parameter(renderer, RENDERER_PORT, ParamIndex::AudioPcm)?
        {
            if (current.channels, current.sample_rate) == (channels, rate) {
                tracing::debug!(channels, rate, "Renderer already matches the decoder");
                return Ok(());
            }
        }
        tracing::info!(%encoding, channels, rate, "Reconfiguring the renderer tunnel");
        self.switch_tunnel(graph, SECOND_TUNNEL, TunnelSwitch::Disable)?;
        self.apply_pcm_codec_info_from_decoder(graph)?;
        self.set_channels_and_rate_on_renderer(graph, channels, rate)?;
        self.switch_tunnel(graph, SECOND_TUNNEL, TunnelSwitch::Enable)
    }

    /// Moves the playlist by `jump` tracks. Zero is a no-op.
    ///
    /// # Errors
    ///
    /// Whatever the source reports.
    pub fn do_skip(&mut self, graph: &mut Graph, jump: i32) -> Result<()> {
        if jump == 0 {
            return Ok(());
        }
        self.count("do_skip");
        let source = self.handle(SOURCE)?;
        graph.set_config(source, Param::PlaylistSkip(jump))
    }

    /// Copies the current track's metadata out of the source.
    ///
    /// # Errors
    ///
    /// `Runtime` when no source is loaded.
    pub fn do_retrieve_metadata(&mut self, graph: &Graph) -> Result<()> {
        self.count("do_retrieve_metadata");
        let source = self.handle(SOURCE)?;
        self.metadata = graph.component(source)?.metadata().clone();
        for (key, value) in &self.metadata {
            tracing::info!(%key, %value, "Track metadata");
        }
        Ok(())
    }

    pub fn is_fatal_error(code: ErrorCode) -> bool {
        FATAL_ERRORS.contains(&code)
    }

    /// Logs `code` and remembers it as the reason the graph stops. Only the
    /// first fatal error is kept.
    pub fn do_record_fatal_error(
        &mut self,
        graph: &Graph,
        handle: Option<ComponentId>,
        code: ErrorCode,
        port: Option<u32>,
    ) {
        self.count("do_record_fatal_error");
        let component = handle
            .and_then(|id| graph.component(id).ok())
            .map_or_else(|| "graph".to_string(), |c| c.name().to_string());
        tracing::error!(%component, %code, ?port, "Fatal error");
        if self.fatal.is_none() {
            self.fatal = Some(FatalError { component, code, port });
        }
    }

    fn fail(&mut self, graph: &Graph, handle: Option<ComponentId>, e: &PortKitError) {
        let code = e.code();
        if Self::is_fatal_error(code) {
            self.do_record_fatal_error(graph, handle, code, None);
        } else {
            tracing::warn!(error = %e, "Graph operation failed");
        }
    }

    /// Builds the decoder and renderer around a source that has just
    /// detected its coding, then lets the data flow.
    ///
    /// # Errors
    ///
    /// `FormatNotDetected` when the coding is still unknown,
    /// `InsufficientResources` when no registered component takes it.
    pub fn probe_stream_hook(&mut self, graph: &mut Graph) -> Result<()> {
        self.count("probe_stream_hook");
        let coding = self.get_encoding_type_from_source(graph)?;
        let role = decoder_role(coding).ok_or_else(|| {
            PortKitError::InsufficientResources(format!("no decoder role for {coding:?}"))
        })?;
        let decoder = self.component_for(role, self.config.decoder.clone())?;
        let renderer = self.component_for(RENDERER_ROLE, self.config.renderer.clone())?;
        tracing::info!(
            ?coding,
            decoder = %decoder.name,
            renderer = %renderer.name,
            "Building the playback chain"
        );

        let source = self.handle(SOURCE)?;
        self.do_disable_comp_ports(graph, source, SOURCE_PORT)?;
        self.do_load(graph, &[decoder, renderer])?;
        self.override_decoder_and_renderer_sampling_rates(graph)?;

        let decoder = self.handle(DECODER)?;
        let renderer = self.handle(RENDERER)?;
        let count = self.config.buffer_count;
        self.tunnels.push(graph.setup_tunnel(
            Endpoint::new(source, SOURCE_PORT),
            Endpoint::new(decoder, DECODER_INPUT_PORT),
            count,
        )?);
        self.tunnels.push(graph.setup_tunnel(
            Endpoint::new(decoder, DECODER_OUTPUT_PORT),
            Endpoint::new(renderer, RENDERER_PORT),
            count,
        )?);

        self.do_loaded2idle(graph)?;
        self.do_idle2exe(graph)?;
        graph.send_command(source, Command::PortEnable(SOURCE_PORT))
    }

    fn component_for(
        &self,
        role: &str,
        params: Option<serde_json::Value>,
    ) -> Result<ComponentSpec> {
        let name = self
            .registry
            .components_for_role(role)
            .into_iter()
            .next()
            .ok_or_else(|| {
                PortKitError::InsufficientResources(format!("no component implements '{role}'"))
            })?;
        Ok(ComponentSpec { name, role: role.to_string(), params })
    }

    /// Reads the coding the source settled on.
    ///
    /// # Errors
    ///
    /// `FormatNotDetected` while it is still unknown.
    pub fn get_encoding_type_from_source(&mut self, graph: &Graph) -> Result<AudioCoding> {
        let source = self.handle(SOURCE)?;
        let coding = match graph.port_definition(source, SOURCE_PORT)?.format {
            PortFormat::Audio { coding } => coding,
            other => {
                return Err(PortKitError::BadParameter(format!(
                    "source port is not audio ({:?})",
                    other.domain()
                )));
            },
        };
        if matches!(coding, AudioCoding::Unused | AudioCoding::AutoDetect) {
            return Err(PortKitError::FormatNotDetected(format!("source still reports {coding:?}")));
        }
        self.encoding = coding;
        Ok(coding)
    }

    /// Seeds decoder and renderer with the configured rate and channels.
    /// The real values arrive with the first decoded frame.
    ///
    /// # Errors
    ///
    /// Whatever the ports report for the values.
    pub fn override_decoder_and_renderer_sampling_rates(
        &mut self,
        graph: &mut Graph,
    ) -> Result<()> {
        let (channels, rate) = (self.config.channels, self.config.sample_rate);
        self.set_channels_and_rate_on_decoder(graph, channels, rate)?;
        self.set_channels_and_rate_on_renderer(graph, channels, rate)
    }

    /// Copies the decoder's PCM block (sample format included) onto the
    /// renderer.
    ///
    /// # Errors
    ///
    /// Whatever the ports report.
    pub fn apply_pcm_codec_info_from_decoder(&mut self, graph: &mut Graph) -> Result<()> {
        let decoder = self.handle(DECODER)?;
        let renderer = self.handle(RENDERER)?;
        let Param::Pcm(pcm) =
            graph.get_parameter(decoder, DECODER_OUTPUT_PORT, ParamIndex::AudioPcm)?
        else {
            return Err(PortKitError::BadParameter(
                "decoder output carries no PCM block".to_string(),
            ));
        };
        self.renderer_pcm = PcmParams { port_index: RENDERER_PORT, ..pcm };
        graph.set_parameter(renderer, RENDERER_PORT, Param::Pcm(self.renderer_pcm.clone()))
    }

    /// The decoder's output (channels, sample rate, coding name).
    ///
    /// # Errors
    ///
    /// Whatever the decoder reports.
    pub fn get_channels_and_rate_from_decoder(&self, graph: &Graph) -> Result<(u32, u32, String)> {
        let decoder = self.handle(DECODER)?;
        match graph.get_parameter(decoder, DECODER_OUTPUT_PORT, ParamIndex::AudioPcm)? {
            Param::Pcm(pcm) => {
                let name = format!("{:?}", self.encoding).to_lowercase();
                Ok((pcm.channels, pcm.sample_rate, name))
            },
            other => Err(PortKitError::BadParameter(format!("unexpected {} block", other.index()))),
        }
    }

    /// # Errors
    ///
    /// `UnsupportedIndex` when the decoder input has no block for the
    /// current coding, otherwise whatever the port reports.
    pub fn set_channels_and_rate_on_decoder(
        &mut self,
        graph: &mut Graph,
        channels: u32,
        rate: u32,
    ) -> Result<()> {
        let decoder = self.handle(DECODER)?;
        let index = codec_index(self.encoding)
            .ok_or_else(|| {
                PortKitError::UnsupportedIndex(format!("no codec block for {:?}", self.encoding))
            })?;
        let mut block = graph.get_parameter(decoder, DECODER_INPUT_PORT, index)?;
        block.set_rate_and_channels(rate, channels);
        graph.set_parameter(decoder, DECODER_INPUT_PORT, block)
    }

    /// # Errors
    ///
    /// Whatever the renderer port reports.
    pub fn set_channels_and_rate_on_renderer(
        &mut self,
        graph: &mut Graph,
        channels: u32,
        rate: u32,
    ) -> Result<()> {
        let renderer = self.handle(RENDERER)?;
        let mut block = graph.get_parameter(renderer, RENDERER_PORT, ParamIndex::AudioPcm)?;
        block.set_rate_and_channels(rate, channels);
        if let Param::Pcm(pcm) = &block {
            self.renderer_pcm = pcm.clone();
        }
        graph.set_parameter(renderer, RENDERER_PORT, block)
    }

    /// Disables both ends of a tunnel (output first), or enables them
    /// (input first).
    ///
    /// # Errors
    ///
    /// `BadParameter` for an unknown tunnel, otherwise whatever the port
    /// commands report.
    pub fn switch_tunnel(
        &mut self,
        graph: &mut Graph,
        tunnel_id: usize,
        switch: TunnelSwitch,
    ) -> Result<()> {
        let (output, input) = self
            .tunnels
            .get(tunnel_id)
            .and_then(|tid| graph.tunnel(*tid))
            .ok_or_else(|| PortKitError::BadParameter(format!("no tunnel {tunnel_id}")))?;
        tracing::debug!(tunnel_id, ?switch, "Switching tunnel");
        match switch {
            TunnelSwitch::Disable => {
                graph.send_command(output.component, Command::PortDisable(output.port))?;
                graph.send_command(input.component, Command::PortDisable(input.port))
            },
            TunnelSwitch::Enable => {
                graph.send_command(input.component, Command::PortEnable(input.port))?;
                graph.send_command(output.component, Command::PortEnable(output.port))
            },
        }
    }

    /// Reacts to one component event.
    pub fn handle_event(&mut self, graph: &mut Graph, update: &ComponentEventUpdate) {
        let Some(id) = graph.find(&update.component) else {
            tracing::warn!(component = %update.component, "Event from an unknown component");
            return;
        };
        let position = self.handles.iter().position(|h| *h == id);
        let result = match (&update.event, position) {
            (ComponentEvent::Error { code, port }, _) => {
                if Self::is_fatal_error(*code) {
                    self.do_record_fatal_error(graph, Some(id), *code, *port);
                } else {
                    tracing::warn!(component = %update.component, %code, ?port, "Component error");
                }
                Ok(())
            },
            (
                ComponentEvent::PortSettingsChanged {
                    port: SOURCE_PORT,
                    index: ParamIndex::PortDefinition,
                },
                Some(SOURCE),
            ) => {
                if self.handles.len() == 1 {
                    self.probe_stream_hook(graph)
                } else {
                    self.do_reconfigure_tunnel(graph, FIRST_TUNNEL)
                }
            },
            (
                ComponentEvent::PortSettingsChanged {
                    port: DECODER_OUTPUT_PORT,
                    index: ParamIndex::AudioPcm,
                },
                Some(DECODER),
            ) if self.tunnels.len() > SECOND_TUNNEL => {
                self.do_reconfigure_tunnel(graph, SECOND_TUNNEL)
            },
            (
                ComponentEvent::IndexSettingChanged { index: ParamIndex::MetadataItem, .. },
                Some(SOURCE),
            ) => {
                self.do_retrieve_metadata(graph)
            },
            (ComponentEvent::BufferFlag { flags, .. }, Some(RENDERER))
                if flags & BufferFlags::EOS.bits() != 0 =>
            {
                self.tracks_played += 1;
                tracing::info!(tracks = self.tracks_played, "End of track");
                self.do_skip(graph, 1)
            },
            (event, _) => {
                tracing::trace!(component = %update.component, ?event, "Event");
                Ok(())
            },
        };
        if let Err(e) = result {
            self.fail(graph, Some(id), &e);
        }
    }

    /// Brings every component back to Loaded, sink first.
    pub fn shutdown(&mut self, graph: &mut Graph) {
        for target in [ComponentState::Idle, ComponentState::Loaded] {
            for id in self.handles.clone().into_iter().rev() {
                let Ok(state) = graph.component(id).map(|c| c.state()) else {
                    continue;
                };
                let step = match (state, target) {
                    (ComponentState::Executing | ComponentState::Pause, ComponentState::Idle)
                    | (ComponentState::Idle, ComponentState::Loaded) => target,
                    _ => continue,
                };
                if let Err(e) = graph.send_command(id, Command::StateSet(step)) {
                    tracing::warn!(component = %id, error = %e, "Shutdown transition failed");
                }
            }
        }
        tracing::info!("Graph shut down");
    }
}

impl std::fmt::Debug for GraphOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphOps")
            .field("service", &self.config.service)
            .field("handles", &self.handles)
            .field("encoding", &self.encoding)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}
