// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The component runtime.
//!
//! A [`Component`] owns its ports, the per-port header queues, the config
//! store, the metadata store and its processor. It executes lifecycle and
//! port commands synchronously, raises events on the graph-wide channel and
//! implements [`Kernel`] for its processor.
//!
//! Headers a processor releases land in an outbox that the graph drains and
//! routes across tunnels. Headers the runtime hands back on its own (a port
//! was disabled, or the component went back to Loaded) land in a separate
//! "returned" list so the graph can park them until the port comes back.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use portkit_core::{
    event_helpers, BufferHeader, ChangedIndexes, Command, ComponentEvent, ComponentEventUpdate,
    ComponentParts, ComponentState, Direction, Kernel, Param, ParamIndex, Port, PortDefinition,
    PortKitError, Processor, ReadyPorts, Result, ALL_PORTS,
};
use tokio::sync::mpsc;

/// Everything the processor reaches through the kernel.
pub(crate) struct ComponentCore {
    name: String,
    state: ComponentState,
    ports: Vec<Box<dyn Port>>,
    queues: HashMap<u32, VecDeque<BufferHeader>>,
    outbox: Vec<(u32, BufferHeader)>,
    returned: Vec<(u32, BufferHeader)>,
    configs: HashMap<ParamIndex, Param>,
    metadata: IndexMap<String, String>,
    events: mpsc::Sender<ComponentEventUpdate>,
    buffers_pending: bool,
    io_active: bool,
    timer_after: Option<Duration>,
    timer_deadline: Option<Instant>,
}

impl ComponentCore {
    fn port(&self, index: u32) -> Result<&dyn Port> {
        self.ports
            .iter()
            .find(|p| p.index() == index)
            .map(|p| &**p)
            .ok_or_else(|| PortKitError::BadParameter(format!("{}: no port {index}", self.name)))
    }

    fn port_mut(&mut self, index: u32) -> Result<&mut Box<dyn Port>> {
        let name = &self.name;
        self.ports
            .iter_mut()
            .find(|p| p.index() == index)
            .ok_or_else(|| PortKitError::BadParameter(format!("{name}: no port {index}")))
    }

    fn port_enabled(&self, index: u32) -> bool {
        self.port(index).is_ok_and(|p| p.definition().enabled)
    }

    fn emit(&self, event: ComponentEvent) {
        event_helpers::emit_event(&self.events, &self.name, event);
    }

    /// Lets every port that follows `master` re-derive its shared parameters
    /// from `param`, announcing each index that moved.
    fn cascade(&mut self, master: u32, param: &Param) {
        let index = param.index();
        let mut changed_events = Vec::new();
        for port in &mut self.ports {
            if port.index() == master || port.master_port() != Some(master) {
                continue;
            }
            let mut changed = ChangedIndexes::new();
            port.apply_slaving_behaviour(index, param, &mut changed);
            for c in changed {
                changed_events
                    .push(ComponentEvent::PortSettingsChanged { port: port.index(), index: c });
            }
        }
        for event in changed_events {
            tracing::debug!(component = %self.name, ?event, "Slaved port changed");
            self.emit(event);
        }
    }

    /// Ports addressed by a port command.
    fn targets(&self, pid: u32) -> Result<Vec<u32>> {
        if pid == ALL_PORTS {
            return Ok(self.ports.iter().map(|p| p.index()).collect());
        }
        self.port(pid)?;
        Ok(vec![pid])
    }

    fn return_queued(&mut self, port: u32) {
        if let Some(queue) = self.queues.get_mut(&port) {
            self.returned.extend(queue.drain(..).map(|hdr| (port, hdr)));
        }
    }
}

impl Kernel for ComponentCore {
    fn component_name(&self) -> &str {
        &self.name
    }

    fn claim_buffer(&mut self, port: u32) -> Result<Option<BufferHeader>> {
        if !self.port(port)?.definition().enabled {
            return Ok(None);
        }
        Ok(self.queues.get_mut(&port).and_then(VecDeque::pop_front))
    }

    fn release_buffer(&mut self, port: u32, header: BufferHeader) -> Result<()> {
        self.port(port)?;
        self.outbox.push((port, header));
        Ok(())
    }

    fn select(&self, nports: u32) -> ReadyPorts {
        (0..nports)
            .filter(|p| self.port_enabled(*p) && self.queues.get(p).is_some_and(|q| !q.is_empty()))
            .collect()
    }

    fn get_parameter(&self, port: u32, index: ParamIndex) -> Result<Param> {
        self.port(port)?.get_parameter(index)
    }

    fn set_parameter_internal(&mut self, port: u32, param: Param) -> Result<()> {
        self.port_mut(port)?.set_parameter_internal(param.clone())?;
        self.cascade(port, &param);
        Ok(())
    }

    fn get_config(&self, index: ParamIndex) -> Result<Param> {
        self.configs
            .get(&index)
            .cloned()
            .ok_or_else(|| {
                PortKitError::UnsupportedIndex(format!("{}: no config {index}", self.name))
            })
    }

    fn issue_event(&mut self, event: ComponentEvent) {
        self.emit(event);
    }

    fn clear_metadata(&mut self) {
        self.metadata.clear();
    }

    fn store_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        tracing::trace!(component = %self.name, key, value, "Metadata item");
        self.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn io_watcher_start(&mut self) {
        self.io_active = true;
    }

    fn io_watcher_stop(&mut self) {
        self.io_active = false;
    }

    fn timer_watcher_start(&mut self, after: Duration) {
        self.timer_after = Some(after);
        self.timer_deadline = Some(Instant::now() + after);
    }

    fn timer_watcher_stop(&mut self) {
        self.timer_deadline = None;
    }

    fn timer_watcher_restart(&mut self) {
        if let Some(after) = self.timer_after {
            self.timer_deadline = Some(Instant::now() + after);
        }
    }
}

/// A live component instance.
pub struct Component {
    core: ComponentCore,
    processor: Box<dyn Processor>,
    role: String,
    transitions_counter: Counter<u64>,
}

impl Component {
    pub fn new(
        name: &str,
        parts: ComponentParts,
        events: mpsc::Sender<ComponentEventUpdate>,
    ) -> Self {
        let meter = global::meter("portkit_engine");
        Self {
            core: ComponentCore {
                name: name.to_string(),
                state: ComponentState::Loaded,
                ports: parts.ports,
                queues: HashMap::new(),
                outbox: Vec::new(),
                returned: Vec::new(),
                configs: HashMap::new(),
                metadata: IndexMap::new(),
                events,
                buffers_pending: false,
                io_active: false,
                timer_after: None,
                timer_deadline: None,
            },
            processor: parts.processor,
            role: parts.role,
            transitions_counter: meter
                .u64_counter("component.state_transitions")
                .with_description("Component lifecycle transitions")
                .build(),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub const fn state(&self) -> ComponentState {
        self.core.state
    }

    pub fn port_indexes(&self) -> Vec<u32> {
        self.core.ports.iter().map(|p| p.index()).collect()
    }

    /// # Errors
    ///
    /// `BadParameter` when the component has no such port.
    pub fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        Ok(self.core.port(port)?.definition().clone())
    }

    pub fn port_enabled(&self, port: u32) -> bool {
        self.core.port_enabled(port)
    }

    pub(crate) fn port(&self, port: u32) -> Result<&dyn Port> {
        self.core.port(port)
    }

    /// Headers currently queued on `port`.
    pub fn queued(&self, port: u32) -> usize {
        self.core.queues.get(&port).map_or(0, VecDeque::len)
    }

    /// # Errors
    ///
    /// `BadParameter` for an unknown port, `UnsupportedIndex` when the port
    /// does not carry `index`.
    pub fn get_parameter(&self, port: u32, index: ParamIndex) -> Result<Param> {
        self.core.get_parameter(port, index)
    }

    /// Client-facing parameter update.
    ///
    /// Only accepted while the component is Loaded or the port is disabled.
    ///
    /// # Errors
    ///
    /// `IncorrectStateOperation` outside those windows, otherwise whatever the
    /// port's validation reports.
    pub fn set_parameter(&mut self, port: u32, param: Param) -> Result<()> {
        if self.core.state != ComponentState::Loaded && self.core.port_enabled(port) {
            return Err(PortKitError::IncorrectStateOperation(format!(
                "{}: port {port} must be disabled to change {} in {}",
                self.core.name,
                param.index(),
                self.core.state
            )));
        }
        self.core.port_mut(port)?.set_parameter(param.clone())?;
        self.core.cascade(port, &param);
        Ok(())
    }

    /// # Errors
    ///
    /// `UnsupportedIndex` when nothing is stored under `index`.
    pub fn get_config(&self, index: ParamIndex) -> Result<Param> {
        self.core.get_config(index)
    }

    /// Stores a component-scoped configuration block. Outside Loaded the
    /// processor is told about the change right away.
    ///
    /// # Errors
    ///
    /// Whatever the processor's `config_change` reports.
    pub fn set_config(&mut self, param: Param) -> Result<()> {
        let index = param.index();
        self.core.configs.insert(index, param);
        if self.core.state == ComponentState::Loaded {
            return Ok(());
        }
        tracing::debug!(component = %self.core.name, %index, "Config changed");
        self.processor.config_change(&mut self.core, ALL_PORTS, index)
    }

    pub const fn metadata(&self) -> &IndexMap<String, String> {
        &self.core.metadata
    }

    /// Executes `cmd` to completion, raising `CmdComplete` for it.
    ///
    /// # Errors
    ///
    /// `IncorrectStateTransition` for a transition the lifecycle forbids,
    /// otherwise whatever the processor reports.
    pub fn send_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(component = %self.core.name, ?cmd, state = %self.core.state, "Command");
        match cmd {
            Command::StateSet(to) => self.change_state(to),
            Command::Flush(pid) => self.flush(pid),
            Command::PortDisable(pid) => self.disable(pid),
            Command::PortEnable(pid) => self.enable(pid),
        }
    }

    fn change_state(&mut self, to: ComponentState) -> Result<()> {
        let from = self.core.state;
        if !from.can_transition_to(to) {
            return Err(PortKitError::IncorrectStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let core = &mut self.core;
        match (from, to) {
            (ComponentState::Loaded, ComponentState::Idle) => {
                self.processor.allocate_resources(&mut *core, ALL_PORTS)?;
            },
            (ComponentState::Idle, ComponentState::Loaded) => {
                self.processor.deallocate_resources()?;
                let ports: Vec<u32> = core.queues.keys().copied().collect();
                for port in ports {
                    core.return_queued(port);
                }
                core.io_active = false;
                core.timer_deadline = None;
            },
            (ComponentState::Idle, ComponentState::Executing) => {
                self.processor.prepare_to_transfer(&mut *core, ALL_PORTS)?;
                self.processor.transfer_and_process(&mut *core, ALL_PORTS)?;
                core.buffers_pending = true;
            },
            (ComponentState::Executing, ComponentState::Pause) => self.processor.pause(&mut *core)?,
            (ComponentState::Pause, ComponentState::Executing) => {
                self.processor.resume(&mut *core)?;
                core.buffers_pending = true;
            },
            (ComponentState::Executing | ComponentState::Pause, ComponentState::Idle) => {
                self.processor.stop_and_return(&mut *core)?;
            },
            _ => {},
        }
        core.state = to;
        self.transitions_counter.add(
            1,
            &[
                KeyValue::new("component", core.name.clone()),
                KeyValue::new("state", to.to_string()),
            ],
        );
        tracing::info!(component = %core.name, %from, %to, "State changed");
        core.emit(ComponentEvent::CmdComplete(Command::StateSet(to)));
        Ok(())
    }

    fn flush(&mut self, pid: u32) -> Result<()> {
        let targets = self.core.targets(pid)?;
        if self.core.state != ComponentState::Loaded {
            self.processor.port_flush(&mut self.core, pid)?;
        }
        for port in targets {
            let direction = self.core.port(port)?.definition().direction;
            // Queued input goes back to its supplier empty.
            if direction == Direction::Input {
                if let Some(queue) = self.core.queues.get_mut(&port) {
                    for mut hdr in queue.drain(..) {
                        hdr.reset();
                        self.core.outbox.push((port, hdr));
                    }
                }
            }
            self.core.emit(ComponentEvent::CmdComplete(Command::Flush(port)));
        }
        Ok(())
    }

    fn disable(&mut self, pid: u32) -> Result<()> {
        let targets = self.core.targets(pid)?;
        for port in &targets {
            self.core.port_mut(*port)?.definition_mut().enabled = false;
        }
        if self.core.state != ComponentState::Loaded {
            self.processor.port_disable(&mut self.core, pid)?;
        }
        for port in targets {
            self.core.return_queued(port);
            tracing::debug!(component = %self.core.name, port, "Port disabled");
            self.core.emit(ComponentEvent::CmdComplete(Command::PortDisable(port)));
        }
        Ok(())
    }

    fn enable(&mut self, pid: u32) -> Result<()> {
        let targets = self.core.targets(pid)?;
        for port in &targets {
            self.core.port_mut(*port)?.definition_mut().enabled = true;
        }
        if self.core.state != ComponentState::Loaded {
            self.processor.port_enable(&mut self.core, pid)?;
            self.core.buffers_pending = true;
        }
        for port in targets {
            tracing::debug!(component = %self.core.name, port, "Port enabled");
            self.core.emit(ComponentEvent::CmdComplete(Command::PortEnable(port)));
        }
        Ok(())
    }

    /// Hands a header to `port`. Headers reaching an output port are emptied
    /// first. A disabled port, or a component in Loaded, hands the header
    /// straight back through [`Component::take_returned`].
    ///
    /// # Errors
    ///
    /// `BadParameter` when the component has no such port.
    pub fn deliver(&mut self, port: u32, mut header: BufferHeader) -> Result<()> {
        let def = self.core.port(port)?.definition();
        if def.direction == Direction::Output {
            header.reset();
        }
        if !def.enabled || self.core.state == ComponentState::Loaded {
            self.core.returned.push((port, header));
            return Ok(());
        }
        self.core.queues.entry(port).or_default().push_back(header);
        self.core.buffers_pending = true;
        Ok(())
    }

    /// Headers the processor released since the last call.
    pub fn take_outbox(&mut self) -> Vec<(u32, BufferHeader)> {
        std::mem::take(&mut self.core.outbox)
    }

    /// Headers the runtime handed back since the last call.
    pub fn take_returned(&mut self) -> Vec<(u32, BufferHeader)> {
        std::mem::take(&mut self.core.returned)
    }

    pub const fn has_pending_buffers(&self) -> bool {
        self.core.buffers_pending && matches!(self.core.state, ComponentState::Executing)
    }

    /// Runs the processor's `buffers_ready` if new headers arrived. Returns
    /// whether it ran.
    pub fn process_buffers(&mut self) -> bool {
        if !self.has_pending_buffers() {
            return false;
        }
        self.core.buffers_pending = false;
        if let Err(e) = self.processor.buffers_ready(&mut self.core) {
            self.report_error(&e, "buffers_ready");
        }
        true
    }

    pub const fn io_active(&self) -> bool {
        self.core.io_active
    }

    /// Lets an active I/O watcher do its work.
    pub fn poll_io(&mut self) {
        if !self.core.io_active || self.core.state != ComponentState::Executing {
            return;
        }
        if let Err(e) = self.processor.io_ready(&mut self.core) {
            self.report_error(&e, "io_ready");
        }
    }

    pub const fn timer_deadline(&self) -> Option<Instant> {
        self.core.timer_deadline
    }

    /// Fires the timer watcher if it is due. Returns whether it fired.
    pub fn fire_timer_if_due(&mut self, now: Instant) -> bool {
        match self.core.timer_deadline {
            Some(deadline) if deadline <= now && self.core.state == ComponentState::Executing => {
                self.core.timer_deadline = None;
                if let Err(e) = self.processor.timer_ready(&mut self.core) {
                    self.report_error(&e, "timer_ready");
                }
                true
            },
            _ => false,
        }
    }

    fn report_error(&self, e: &PortKitError, entry_point: &str) {
        tracing::error!(component = %self.core.name, entry_point, error = %e, "Processor error");
        event_helpers::emit_error(&self.core.events, &self.core.name, e.code(), None);
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.core.name)
            .field("role", &self.role)
            .field("state", &self.core.state)
            .finish_non_exhaustive()
    }
}
