// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The kernel interface a processor sees.
//!
//! The kernel owns the port queues and arbitrates buffer header ownership
//! between the processor and the rest of the graph. It also provides the
//! parameter store, the metadata store, event issuing, and the I/O and timer
//! watchers that drive processors backed by an asynchronous transfer engine.
//!
//! Processors never hold on to the kernel: it is passed to every entry point,
//! which keeps the processor's own state free of aliasing back-references.

use std::time::Duration;

use smallvec::SmallVec;

use crate::buffer::BufferHeader;
use crate::error::Result;
use crate::params::{Param, ParamIndex};
use crate::state::ComponentEvent;

/// Set of port indexes returned by [`Kernel::select`].
pub type ReadyPorts = SmallVec<[u32; 4]>;

pub trait Kernel {
    /// Name of the component this kernel belongs to, for log context.
    fn component_name(&self) -> &str;

    /// Takes the next available header on `port`, if any.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for an unknown port.
    fn claim_buffer(&mut self, port: u32) -> Result<Option<BufferHeader>>;

    /// Hands a header back. Output headers travel downstream, input headers
    /// travel back to their supplier.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for an unknown port.
    fn release_buffer(&mut self, port: u32, header: BufferHeader) -> Result<()>;

    /// Ports among `0..nports` that currently have a header available.
    fn select(&self, nports: u32) -> ReadyPorts;

    /// Reads a port-scoped parameter.
    ///
    /// # Errors
    ///
    /// `UnsupportedIndex` when the port does not carry `index`.
    fn get_parameter(&self, port: u32, index: ParamIndex) -> Result<Param>;

    /// Writes a port-scoped parameter, bypassing the slave-port check.
    /// Slaving still cascades to the ports that follow `port`.
    ///
    /// # Errors
    ///
    /// `BadParameter` when validation fails.
    fn set_parameter_internal(&mut self, port: u32, param: Param) -> Result<()>;

    /// Reads a component-scoped parameter or configuration value
    /// (content URI, session, playlist, playlist skip).
    ///
    /// # Errors
    ///
    /// `UnsupportedIndex` when nothing was stored under `index`.
    fn get_config(&self, index: ParamIndex) -> Result<Param>;

    fn issue_event(&mut self, event: ComponentEvent);

    fn clear_metadata(&mut self);

    /// # Errors
    ///
    /// `InsufficientResources` when the store is full.
    fn store_metadata(&mut self, key: &str, value: &str) -> Result<()>;

    fn io_watcher_start(&mut self);
    fn io_watcher_stop(&mut self);
    fn timer_watcher_start(&mut self, after: Duration);
    fn timer_watcher_stop(&mut self);
    fn timer_watcher_restart(&mut self);
}
