// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PortKit Core - Fundamental traits and data structures for component-based media graphs.
//!
//! ## Core Modules
//!
//! - [`types`]: Directions, domains, codings and port definitions
//! - [`params`]: Parameter index space and codec/service parameter blocks
//! - [`port`]: Port trait, audio/video ports, tunnel checks and slaving
//! - [`buffer`]: Buffer headers and the single-owner claim slot
//! - [`kernel`]: The kernel interface processors see
//! - [`processor`]: Processor trait and component parts
//! - [`state`]: Component states, commands and events
//! - [`registry`]: Component factory and discovery
//! - [`error`]: Error types and codes
//! - [`helpers`]: Configuration parsing helpers
//!
//! ## Quick Start
//!
//! ```ignore
//! use portkit_core::{ComponentParts, ComponentRegistry, Processor};
//! use portkit_core::port::{AudioPort, Port};
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register(
//!     "my.renderer",
//!     &["audio_renderer.pcm"],
//!     |role, _params| {
//!         let pcm = AudioPort::pcm(0, Direction::Input, 8192, Default::default());
//!         let ports: Vec<Box<dyn Port>> = vec![Box::new(pcm)];
//!         Ok(ComponentParts::new(role, ports, Box::new(MyRenderer::default())))
//!     },
//!     serde_json::json!({}),
//!     "Renders PCM",
//! );
//! ```

pub mod buffer;
pub mod error;
pub mod helpers;
pub mod kernel;
pub mod params;
pub mod port;
pub mod processor;
pub mod registry;
pub mod state;
pub mod types;

// Error handling
pub use error::{ErrorCode, PortKitError, Result};

// Core abstractions
pub use buffer::{BufferFlags, BufferHeader, HeaderSlot};
pub use kernel::{Kernel, ReadyPorts};
pub use port::{AudioPort, ChangedIndexes, OtherPort, Port, VideoPort};
pub use processor::{ComponentParts, Processor};

// Registry and factory
pub use registry::{ComponentDefinition, ComponentFactory, ComponentRegistry};

// State tracking
pub use state::{event_helpers, Command, ComponentEvent, ComponentEventUpdate, ComponentState};

pub use helpers::config_helpers;
pub use params::{Param, ParamIndex};
pub use types::{Direction, Domain, Encoding, PortDefinition, PortFormat, ALL_PORTS};
