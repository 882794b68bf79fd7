// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Component state machine, commands and events.
//!
//! ## State Machine
//!
//! ```text
//!     Loaded
//!       ↓ allocate_resources
//!      Idle ←──────────────┐
//!       ↓ prepare_to_transfer, transfer_and_process
//!   Executing ⇄ Pause      │
//!       ↓ stop_and_return  │
//!      Idle ───────────────┘
//!       ↓ deallocate_resources
//!     Loaded
//! ```
//!
//! Port disable/enable and flush are orthogonal to the state above and are
//! accepted in Idle, Executing and Pause.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::buffer::BufferFlags;
use crate::error::ErrorCode;
use crate::params::ParamIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
    Pause,
}

impl ComponentState {
    /// Whether the lifecycle permits moving from `self` to `to`.
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Loaded, Self::Idle)
                | (Self::Idle, Self::Loaded | Self::Executing | Self::Pause)
                | (Self::Executing, Self::Idle | Self::Pause)
                | (Self::Pause, Self::Idle | Self::Executing)
        )
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Commands accepted by a component. Port-scoped commands take
/// [`crate::types::ALL_PORTS`] to address every port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    StateSet(ComponentState),
    Flush(u32),
    PortDisable(u32),
    PortEnable(u32),
}

/// Notifications raised by a component towards its client (the graph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentEvent {
    CmdComplete(Command),
    Error { code: ErrorCode, port: Option<u32> },
    /// The parameter block `index` on `port` changed underneath the client.
    PortSettingsChanged { port: u32, index: ParamIndex },
    PortFormatDetected { port: u32 },
    /// A component-level setting changed (e.g. a new set of metadata items).
    IndexSettingChanged { port: Option<u32>, index: ParamIndex },
    BufferFlag { port: u32, flags: u32 },
}

impl ComponentEvent {
    pub const fn eos(port: u32) -> Self {
        Self::BufferFlag { port, flags: BufferFlags::EOS.bits() }
    }
}

/// An event tagged with the component that raised it.
#[derive(Debug, Clone)]
pub struct ComponentEventUpdate {
    pub component: String,
    pub event: ComponentEvent,
    pub timestamp: SystemTime,
}

impl ComponentEventUpdate {
    #[inline]
    pub fn new(component: String, event: ComponentEvent) -> Self {
        Self { component, event, timestamp: SystemTime::now() }
    }
}

/// Helper functions for emitting component events.
pub mod event_helpers {
    use super::{ComponentEvent, ComponentEventUpdate};
    use crate::error::ErrorCode;
    use tokio::sync::mpsc;

    /// Emits an event to the provided channel.
    /// Failures are logged and otherwise ignored; a full or closed channel
    /// must never stall the processing context.
    #[inline]
    pub fn emit_event(
        event_tx: &mpsc::Sender<ComponentEventUpdate>,
        component: &str,
        event: ComponentEvent,
    ) {
        if let Err(e) = event_tx.try_send(ComponentEventUpdate::new(component.to_string(), event)) {
            tracing::warn!(component, "Dropping component event: {e}");
        }
    }

    #[inline]
    pub fn emit_error(
        event_tx: &mpsc::Sender<ComponentEventUpdate>,
        component: &str,
        code: ErrorCode,
        port: Option<u32>,
    ) {
        emit_event(event_tx, component, ComponentEvent::Error { code, port });
    }
}
