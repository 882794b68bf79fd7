// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use portkit_core::ComponentRegistry;

// Declare the top-level feature modules directly.
pub mod audio;
pub mod containers;
pub mod sources;
pub mod transfer;
pub mod video;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// A single function to register all built-in components.
///
/// The VP8 decoder needs a codec supplied by the caller and is registered
/// separately through [`video::vp8::register_vp8_decoder`].
pub fn register_components(registry: &mut ComponentRegistry) {
    audio::register_audio_components(registry);
    containers::register_container_components(registry);
    sources::register_source_components(registry);

    tracing::info!("Finished registering built-in components.");
}
