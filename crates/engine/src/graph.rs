// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Component graph: instances, tunnels and the loop that moves headers
//! between them.
//!
//! A tunnel connects an output port to an input port. Both sides share one
//! pool of headers: filled headers travel from the output to the input,
//! emptied ones travel back. Headers that cannot be delivered because the
//! destination port is disabled (or its component is Loaded) are parked on
//! the tunnel and reseeded as soon as the destination comes back.

use std::time::{Duration, Instant};

use portkit_core::{
    BufferHeader, Command, ComponentEventUpdate, ComponentParts, ComponentRegistry, ComponentState,
    Direction, Param, ParamIndex, PortDefinition, PortKitError, Result,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::component::Component;
use crate::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_IO_POLL_INTERVAL_MS, DEFAULT_TUNNEL_BUFFER_COUNT,
    MAX_PUMP_PASSES,
};
use crate::ops::GraphOps;

/// Handle of a component inside a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub usize);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One side of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub component: ComponentId,
    pub port: u32,
}

impl Endpoint {
    pub const fn new(component: ComponentId, port: u32) -> Self {
        Self { component, port }
    }
}

pub type TunnelId = usize;

#[derive(Debug)]
struct Tunnel {
    output: Endpoint,
    input: Endpoint,
    /// Undeliverable headers, tagged with the side they are headed for.
    parked: Vec<(Direction, BufferHeader)>,
}

impl Tunnel {
    const fn endpoint(&self, side: Direction) -> Endpoint {
        match side {
            Direction::Output => self.output,
            Direction::Input => self.input,
        }
    }
}

pub struct Graph {
    components: Vec<Component>,
    tunnels: Vec<Tunnel>,
    events_tx: mpsc::Sender<ComponentEventUpdate>,
    events_rx: mpsc::Receiver<ComponentEventUpdate>,
    /// Headers released on ports that take part in no tunnel.
    unrouted: Vec<(Endpoint, BufferHeader)>,
    next_header_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        Self {
            components: Vec::new(),
            tunnels: Vec::new(),
            events_tx,
            events_rx,
            unrouted: Vec::new(),
            next_header_id: 1,
        }
    }

    /// Instantiates `name` under `role` and adds it to the graph in Loaded.
    ///
    /// # Errors
    ///
    /// Whatever the registry reports for an unknown name, an unsupported
    /// role or invalid params.
    pub fn load(
        &mut self,
        registry: &ComponentRegistry,
        name: &str,
        role: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<ComponentId> {
        let parts = registry.create(name, role, params)?;
        let instance = format!("{name}{}", ComponentId(self.components.len()));
        tracing::info!(component = %instance, role, "Component loaded");
        Ok(self.add(&instance, parts))
    }

    /// Adds a component built outside the registry.
    pub fn add(&mut self, name: &str, parts: ComponentParts) -> ComponentId {
        let id = ComponentId(self.components.len());
        self.components.push(Component::new(name, parts, self.events_tx.clone()));
        id
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// # Errors
    ///
    /// `BadParameter` for an id this graph never handed out.
    pub fn component(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(id.0)
            .ok_or_else(|| PortKitError::BadParameter(format!("no component {id}")))
    }

    fn component_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        self.components
            .get_mut(id.0)
            .ok_or_else(|| PortKitError::BadParameter(format!("no component {id}")))
    }

    pub fn find(&self, name: &str) -> Option<ComponentId> {
        self.components.iter().position(|c| c.name() == name).map(ComponentId)
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> {
        (0..self.components.len()).map(ComponentId)
    }

    /// Runs `cmd` on `id`, then moves whatever headers the command freed.
    ///
    /// # Errors
    ///
    /// Whatever the component reports for the command.
    pub fn send_command(&mut self, id: ComponentId, cmd: Command) -> Result<()> {
        let result = self.component_mut(id)?.send_command(cmd);
        self.collect(id);
        self.reseed();
        result
    }

    /// # Errors
    ///
    /// `BadParameter` for an unknown component or port.
    pub fn port_definition(&self, id: ComponentId, port: u32) -> Result<PortDefinition> {
        self.component(id)?.port_definition(port)
    }

    /// # Errors
    ///
    /// See [`Component::get_parameter`].
    pub fn get_parameter(&self, id: ComponentId, port: u32, index: ParamIndex) -> Result<Param> {
        self.component(id)?.get_parameter(port, index)
    }

    /// # Errors
    ///
    /// See [`Component::set_parameter`].
    pub fn set_parameter(&mut self, id: ComponentId, port: u32, param: Param) -> Result<()> {
        self.component_mut(id)?.set_parameter(port, param)
    }

    /// # Errors
    ///
    /// See [`Component::get_config`].
    pub fn get_config(&self, id: ComponentId, index: ParamIndex) -> Result<Param> {
        self.component(id)?.get_config(index)
    }

    /// # Errors
    ///
    /// See [`Component::set_config`].
    pub fn set_config(&mut self, id: ComponentId, param: Param) -> Result<()> {
        let result = self.component_mut(id)?.set_config(param);
        self.collect(id);
        self.reseed();
        result
    }

    /// Connects `output` to `input` and seeds the output side with a fresh
    /// header pool.
    ///
    /// Both sides must be Loaded or have the port disabled. The pool holds
    /// `buffer_count` headers (at least what either port asks for) sized to
    /// the larger of the two ports' minimum buffer sizes.
    ///
    /// # Errors
    ///
    /// `BadParameter` when the directions are wrong or an endpoint is
    /// already tunnelled, `IncorrectStateOperation` when a port is live,
    /// `PortsNotCompatible` when the formats cannot meet.
    pub fn setup_tunnel(
        &mut self,
        output: Endpoint,
        input: Endpoint,
        buffer_count: Option<u32>,
    ) -> Result<TunnelId> {
        if self.tunnel_of(output).is_some() || self.tunnel_of(input).is_some() {
            return Err(PortKitError::BadParameter(format!(
                "{}:{} or {}:{} is already tunnelled",
                output.component, output.port, input.component, input.port
            )));
        }
        let out_comp = self.component(output.component)?;
        let in_comp = self.component(input.component)?;
        let out_def = out_comp.port_definition(output.port)?;
        let in_def = in_comp.port_definition(input.port)?;
        if out_def.direction != Direction::Output || in_def.direction != Direction::Input {
            return Err(PortKitError::BadParameter(format!(
                "tunnel must run from an output to an input ({} port {} -> {} port {})",
                out_comp.name(),
                output.port,
                in_comp.name(),
                input.port
            )));
        }
        for (comp, def) in [(out_comp, &out_def), (in_comp, &in_def)] {
            if comp.state() != ComponentState::Loaded && def.enabled {
                return Err(PortKitError::IncorrectStateOperation(format!(
                    "{}: port {} must be disabled to tunnel in {}",
                    comp.name(),
                    def.index,
                    comp.state()
                )));
            }
        }
        let compatible = out_comp.port(output.port)?.check_tunnel_compatibility(&out_def, &in_def)
            && in_comp.port(input.port)?.check_tunnel_compatibility(&in_def, &out_def);
        if !compatible {
            tracing::error!(
                output = %out_comp.name(),
                input = %in_comp.name(),
                out_format = ?out_def.format,
                in_format = ?in_def.format,
                "Ports are not compatible"
            );
            return Err(PortKitError::PortsNotCompatible(format!(
                "{} port {} cannot feed {} port {}",
                out_comp.name(),
                output.port,
                in_comp.name(),
                input.port
            )));
        }

        let count = buffer_count
            .unwrap_or(DEFAULT_TUNNEL_BUFFER_COUNT)
            .max(out_def.buffer_count_actual)
            .max(in_def.buffer_count_actual);
        let size = out_def.buffer_size.max(in_def.buffer_size);
        tracing::debug!(
            output = %out_comp.name(),
            input = %in_comp.name(),
            count,
            size,
            "Tunnel established"
        );

        let id = self.tunnels.len();
        self.tunnels.push(Tunnel { output, input, parked: Vec::new() });
        for _ in 0..count {
            let header = BufferHeader::new(self.next_header_id, size);
            self.next_header_id += 1;
            self.tunnels[id].parked.push((Direction::Output, header));
        }
        self.reseed();
        Ok(id)
    }

    /// The (output, input) endpoints of `id`.
    pub fn tunnel(&self, id: TunnelId) -> Option<(Endpoint, Endpoint)> {
        self.tunnels.get(id).map(|t| (t.output, t.input))
    }

    /// Headers parked on `id`, waiting for a disabled side to come back.
    pub fn parked(&self, id: TunnelId) -> usize {
        self.tunnels.get(id).map_or(0, |t| t.parked.len())
    }

    fn tunnel_of(&self, ep: Endpoint) -> Option<(TunnelId, Direction)> {
        self.tunnels.iter().enumerate().find_map(|(i, t)| {
            if t.output == ep {
                Some((i, Direction::Output))
            } else if t.input == ep {
                Some((i, Direction::Input))
            } else {
                None
            }
        })
    }

    fn accepts(&self, ep: Endpoint) -> bool {
        self.components
            .get(ep.component.0)
            .is_some_and(|c| c.state() != ComponentState::Loaded && c.port_enabled(ep.port))
    }

    /// Hands a header to `ep` directly. Used to feed ports that take part in
    /// no tunnel.
    ///
    /// # Errors
    ///
    /// `BadParameter` for an unknown component or port.
    pub fn deliver(&mut self, ep: Endpoint, header: BufferHeader) -> Result<()> {
        self.component_mut(ep.component)?.deliver(ep.port, header)?;
        self.collect(ep.component);
        Ok(())
    }

    /// Headers released on untunnelled ports since the last call.
    pub fn take_unrouted(&mut self) -> Vec<(Endpoint, BufferHeader)> {
        std::mem::take(&mut self.unrouted)
    }

    /// Routes one released header to the other side of its tunnel.
    fn route(&mut self, from: Endpoint, mut header: BufferHeader) {
        let Some((tid, side)) = self.tunnel_of(from) else {
            self.unrouted.push((from, header));
            return;
        };
        let (dest_side, dest) = match side {
            Direction::Output => (Direction::Input, self.tunnels[tid].input),
            Direction::Input => {
                header.reset();
                (Direction::Output, self.tunnels[tid].output)
            },
        };
        if !self.accepts(dest) {
            self.tunnels[tid].parked.push((dest_side, header));
            return;
        }
        if let Some(comp) = self.components.get_mut(dest.component.0) {
            if let Err(e) = comp.deliver(dest.port, header) {
                tracing::error!(
                    component = %comp.name(),
                    port = dest.port,
                    error = %e,
                    "Header delivery failed"
                );
            }
        }
    }

    /// Drains one component's outbox and returned list. Returns whether any
    /// header moved.
    fn collect(&mut self, id: ComponentId) -> bool {
        let Some(comp) = self.components.get_mut(id.0) else {
            return false;
        };
        let outbox = comp.take_outbox();
        let returned = comp.take_returned();
        let moved = !outbox.is_empty() || !returned.is_empty();
        for (port, header) in returned {
            let from = Endpoint::new(id, port);
            match self.tunnel_of(from) {
                // Held data stays with the side that gave it back.
                Some((tid, side)) => self.tunnels[tid].parked.push((side, header)),
                None => self.unrouted.push((from, header)),
            }
        }
        for (port, header) in outbox {
            self.route(Endpoint::new(id, port), header);
        }
        moved
    }

    fn collect_all(&mut self) -> bool {
        let mut moved = false;
        for i in 0..self.components.len() {
            moved |= self.collect(ComponentId(i));
        }
        moved
    }

    /// Delivers parked headers whose destination accepts them again.
    fn reseed(&mut self) {
        for tid in 0..self.tunnels.len() {
            let parked = std::mem::take(&mut self.tunnels[tid].parked);
            for (side, header) in parked {
                let dest = self.tunnels[tid].endpoint(side);
                if !self.accepts(dest) {
                    self.tunnels[tid].parked.push((side, header));
                    continue;
                }
                if let Some(comp) = self.components.get_mut(dest.component.0) {
                    if let Err(e) = comp.deliver(dest.port, header) {
                        tracing::error!(component = %comp.name(), error = %e, "Reseeding failed");
                    }
                }
            }
        }
    }

    /// Routes released headers and runs `buffers_ready` until no component
    /// has pending work. Returns the number of passes that made progress.
    pub fn pump(&mut self) -> usize {
        let mut passes = 0;
        while passes < MAX_PUMP_PASSES {
            let mut progressed = self.collect_all();
            for comp in &mut self.components {
                progressed |= comp.process_buffers();
            }
            progressed |= self.collect_all();
            if !progressed {
                break;
            }
            passes += 1;
        }
        if passes == MAX_PUMP_PASSES {
            tracing::warn!(passes, "Pump stopped at the pass limit");
        }
        passes
    }

    /// Lets every component with an active I/O watcher do its work.
    pub fn poll_io(&mut self) {
        for comp in &mut self.components {
            if comp.io_active() {
                comp.poll_io();
            }
        }
        self.collect_all();
    }

    /// Fires due timer watchers. Returns how many fired.
    pub fn fire_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for comp in &mut self.components {
            if comp.fire_timer_if_due(now) {
                fired += 1;
            }
        }
        if fired > 0 {
            self.collect_all();
        }
        fired
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.components.iter().filter_map(Component::timer_deadline).min()
    }

    /// Events raised since the last call, in order.
    pub fn drain_events(&mut self) -> Vec<ComponentEventUpdate> {
        let mut events = Vec::new();
        while let Ok(update) = self.events_rx.try_recv() {
            events.push(update);
        }
        events
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("components", &self.components)
            .field("tunnels", &self.tunnels.len())
            .finish_non_exhaustive()
    }
}

/// Drives a [`Graph`] and feeds its events to [`GraphOps`].
pub struct GraphDriver {
    graph: Graph,
    ops: GraphOps,
    poll_interval: Duration,
}

impl GraphDriver {
    pub const fn new(graph: Graph, ops: GraphOps) -> Self {
        Self { graph, ops, poll_interval: Duration::from_millis(DEFAULT_IO_POLL_INTERVAL_MS) }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    pub const fn ops(&self) -> &GraphOps {
        &self.ops
    }

    /// Loads, configures and starts the chain.
    ///
    /// # Errors
    ///
    /// The first failing operation's error.
    pub fn start(&mut self) -> Result<()> {
        self.ops.start(&mut self.graph)?;
        self.settle();
        Ok(())
    }

    /// One driver iteration: I/O, timers, pumping, event dispatch.
    pub fn step(&mut self, now: Instant) {
        self.graph.poll_io();
        self.graph.fire_timers(now);
        self.settle();
    }

    /// Pumps and dispatches until no event is left. Handling an event may
    /// raise more.
    fn settle(&mut self) {
        loop {
            self.graph.pump();
            let events = self.graph.drain_events();
            if events.is_empty() {
                break;
            }
            for update in events {
                self.ops.handle_event(&mut self.graph, &update);
            }
        }
    }

    /// Runs until cancelled or until the ops report a fatal error.
    ///
    /// # Errors
    ///
    /// `Runtime` carrying the fatal error report.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        self.start()?;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Graph driver cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.step(Instant::now());
                    if let Some(fatal) = self.ops.fatal_error() {
                        let report = fatal.to_string();
                        self.ops.shutdown(&mut self.graph);
                        return Err(PortKitError::Runtime(report));
                    }
                }
            }
        }
        self.ops.shutdown(&mut self.graph);
        Ok(())
    }
}
