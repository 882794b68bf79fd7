// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! engine: The component runtime and graph driver for PortKit.
//! This crate runs components through their lifecycle, moves buffer headers
//! across tunnels and orchestrates service playback graphs.

use std::sync::Arc;

use portkit_core::ComponentRegistry;

// --- Public Modules ---

pub mod component;
pub mod constants;
pub mod graph;
pub mod ops;
pub mod services;

// Re-exports
pub use component::Component;
pub use graph::{ComponentId, Endpoint, Graph, GraphDriver, TunnelId};
pub use ops::{ComponentSpec, FatalError, GraphOps, TunnelSwitch, FATAL_ERRORS};
pub use services::ServiceConfig;

// --- Engine Structs ---

/// Unified entry point: a populated registry plus constructors for service
/// graphs built on it.
pub struct Engine {
    pub registry: Arc<ComponentRegistry>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates a new engine with every built-in component registered.
    pub fn new() -> Self {
        let mut registry = ComponentRegistry::new();
        portkit_nodes::register_components(&mut registry);
        Self::with_registry(registry)
    }

    /// Creates an engine around a caller-provided registry.
    pub fn with_registry(registry: ComponentRegistry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    /// Builds the driver for one service playback graph. Nothing is loaded
    /// until the driver starts.
    pub fn service_driver(&self, config: ServiceConfig) -> GraphDriver {
        tracing::info!(
            service = ?config.service,
            playlist = %config.playlist.name,
            bitrate_kbps = config.bitrate_kbps,
            cache_seconds = config.cache_seconds,
            "Creating service graph"
        );
        GraphDriver::new(Graph::new(), GraphOps::new(Arc::clone(&self.registry), config))
    }
}

#[cfg(test)]
mod tests;
