// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Audio decoder and renderer components and their registration logic.

use portkit_core::ComponentRegistry;

pub mod decoder;
#[cfg(feature = "symphonia")]
pub mod mp3;
pub mod renderer;

/// Registers all available audio components.
pub fn register_audio_components(registry: &mut ComponentRegistry) {
    #[cfg(feature = "symphonia")]
    {
        use decoder::{AudioDecoderConfig, AudioDecoderProcessor};
        use portkit_core::{config_helpers, ComponentParts};
        use schemars::schema_for;

        registry.register(
            "portkit.mp3_decoder",
            &["audio_decoder.mp3"],
            |role, params| {
                let config: AudioDecoderConfig = config_helpers::parse_config_optional(params)?;
                let ports = AudioDecoderProcessor::<mp3::Mp3Decoder>::mp3_ports(&config);
                let processor = AudioDecoderProcessor::new(mp3::Mp3Decoder::new());
                Ok(ComponentParts::new(role, ports, Box::new(processor)))
            },
            serde_json::to_value(schema_for!(AudioDecoderConfig)).unwrap_or_default(),
            "Decodes MPEG-1/2 Layer III streams into interleaved 16-bit PCM.",
        );
    }

    renderer::register_pcm_renderer(registry);
}
