// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The processor trait: per-component business logic.
//!
//! A processor is driven by its component through a fixed sequence of entry
//! points. Every entry point receives the component's [`Kernel`], which is how
//! the processor claims and releases buffer headers, reads configuration and
//! raises events. Entry points are serialized by the owning component and
//! must never block: when no header is available they return and wait to be
//! invoked again.

use crate::error::Result;
use crate::kernel::Kernel;
use crate::params::ParamIndex;
use crate::port::Port;

/// The fundamental trait for a component's processing logic.
pub trait Processor: Send {
    /// Loaded -> Idle. Acquires collaborators (codec, transfer engine,
    /// content provider) and reads the configuration they need.
    ///
    /// # Errors
    ///
    /// `InsufficientResources` when a collaborator fails to initialize.
    fn allocate_resources(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// Idle -> Loaded. Must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// Implementations normally succeed; errors are reported to the client.
    fn deallocate_resources(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Implementation specific.
    fn prepare_to_transfer(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// # Errors
    ///
    /// Implementation specific.
    fn transfer_and_process(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// Executing -> Idle. Releases every held header before returning.
    ///
    /// # Errors
    ///
    /// Propagates kernel release failures.
    fn stop_and_return(&mut self, kernel: &mut dyn Kernel) -> Result<()>;

    /// Invoked whenever headers become available on any port.
    ///
    /// # Errors
    ///
    /// Implementation specific; fatal errors abort the session.
    fn buffers_ready(&mut self, kernel: &mut dyn Kernel) -> Result<()>;

    /// # Errors
    ///
    /// Implementation specific.
    fn io_ready(&mut self, _kernel: &mut dyn Kernel) -> Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Implementation specific.
    fn timer_ready(&mut self, _kernel: &mut dyn Kernel) -> Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Implementation specific.
    fn pause(&mut self, _kernel: &mut dyn Kernel) -> Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Implementation specific.
    fn resume(&mut self, _kernel: &mut dyn Kernel) -> Result<()> {
        Ok(())
    }

    /// Releases every held header, in both directions.
    ///
    /// # Errors
    ///
    /// Propagates kernel release failures.
    fn port_flush(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// Releases every held header and stops claiming output headers until
    /// the matching [`Processor::port_enable`].
    ///
    /// # Errors
    ///
    /// Propagates kernel release failures.
    fn port_disable(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// # Errors
    ///
    /// Implementation specific.
    fn port_enable(&mut self, kernel: &mut dyn Kernel, pid: u32) -> Result<()>;

    /// A component-scoped configuration index was updated while executing.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn config_change(
        &mut self,
        _kernel: &mut dyn Kernel,
        _pid: u32,
        _index: ParamIndex,
    ) -> Result<()> {
        Ok(())
    }
}

/// Everything a factory produces for one component instance.
pub struct ComponentParts {
    pub role: String,
    pub ports: Vec<Box<dyn Port>>,
    pub processor: Box<dyn Processor>,
}

impl ComponentParts {
    pub fn new(
        role: impl Into<String>,
        ports: Vec<Box<dyn Port>>,
        processor: Box<dyn Processor>,
    ) -> Self {
        Self { role: role.into(), ports, processor }
    }
}
