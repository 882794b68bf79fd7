// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Network sources backed by the URL transfer adapter.

use portkit_core::types::AudioCoding;
use portkit_core::{
    ComponentEvent, ComponentRegistry, ErrorCode, Kernel, Param, ParamIndex, PortFormat,
    PortKitError, Result,
};

pub mod headers;
pub mod provider;
pub mod streaming;

/// Output port of every source component.
pub const SOURCE_PORT: u32 = 0;

/// Reads the audio coding currently declared on `port`.
pub(crate) fn port_coding(kernel: &dyn Kernel, port: u32) -> Result<AudioCoding> {
    match kernel.get_parameter(port, ParamIndex::PortDefinition)? {
        Param::PortDefinition(def) => match def.format {
            PortFormat::Audio { coding } => Ok(coding),
            other => Err(PortKitError::BadParameter(format!(
                "port {port} is not an audio port ({:?})",
                other.domain()
            ))),
        },
        other => Err(PortKitError::BadParameter(format!("unexpected {} block", other.index()))),
    }
}

/// Writes `coding` into the definition of `port`, bypassing the client-facing checks.
pub(crate) fn set_port_coding(
    kernel: &mut dyn Kernel,
    port: u32,
    coding: AudioCoding,
) -> Result<()> {
    let Param::PortDefinition(mut def) = kernel.get_parameter(port, ParamIndex::PortDefinition)?
    else {
        return Err(PortKitError::BadParameter(format!("port {port} has no definition")));
    };
    def.format = PortFormat::Audio { coding };
    kernel.set_parameter_internal(port, Param::PortDefinition(def))
}

/// Tells the client what the first stream bytes revealed about `port`.
pub(crate) fn issue_auto_detect_events(kernel: &mut dyn Kernel, port: u32, coding: AudioCoding) {
    if matches!(coding, AudioCoding::Unused | AudioCoding::AutoDetect) {
        tracing::warn!(
            component = %kernel.component_name(),
            port,
            "Could not detect the stream format"
        );
        kernel.issue_event(ComponentEvent::Error {
            code: ErrorCode::FormatNotDetected,
            port: Some(port),
        });
        return;
    }
    tracing::info!(component = %kernel.component_name(), port, ?coding, "Stream format detected");
    kernel.issue_event(ComponentEvent::PortFormatDetected { port });
    kernel.issue_event(ComponentEvent::PortSettingsChanged {
        port,
        index: ParamIndex::PortDefinition,
    });
}

/// Registers all source components.
pub fn register_source_components(registry: &mut ComponentRegistry) {
    streaming::register_streaming_sources(registry);
}
