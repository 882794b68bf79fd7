// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Container-level source components.

use portkit_core::ComponentRegistry;

pub mod webm_source;

/// Registers all available container components.
pub fn register_container_components(registry: &mut ComponentRegistry) {
    webm_source::register_webm_source(registry);
}
