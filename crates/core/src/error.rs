// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for PortKit.
//!
//! Every error maps onto a stable [`ErrorCode`], which is what travels inside
//! component error events and what the graph orchestration consults when it
//! decides whether a failure is fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes carried by component events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InsufficientResources,
    Undefined,
    BadParameter,
    UnsupportedIndex,
    UnsupportedSetting,
    NotReady,
    IncorrectStateTransition,
    IncorrectStateOperation,
    PortsNotCompatible,
    ContentUriError,
    FormatNotDetected,
    StreamCorrupt,
    StreamCorruptFatal,
    NetworkError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientResources => "insufficient_resources",
            Self::Undefined => "undefined",
            Self::BadParameter => "bad_parameter",
            Self::UnsupportedIndex => "unsupported_index",
            Self::UnsupportedSetting => "unsupported_setting",
            Self::NotReady => "not_ready",
            Self::IncorrectStateTransition => "incorrect_state_transition",
            Self::IncorrectStateOperation => "incorrect_state_operation",
            Self::PortsNotCompatible => "ports_not_compatible",
            Self::ContentUriError => "content_uri_error",
            Self::FormatNotDetected => "format_not_detected",
            Self::StreamCorrupt => "stream_corrupt",
            Self::StreamCorruptFatal => "stream_corrupt_fatal",
            Self::NetworkError => "network_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for PortKit operations.
#[derive(Debug, Error)]
pub enum PortKitError {
    /// A parameter value failed validation.
    ///
    /// Examples:
    /// - Sample rate outside the legal set for the port's codec
    /// - A slave port trying to diverge from its master's rate/channels
    /// - Parameter block whose domain does not match the port
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// The requested parameter index is not handled by the target.
    #[error("Unsupported index: {0}")]
    UnsupportedIndex(String),

    /// A collaborator (codec, transfer engine, content provider) could not be
    /// initialized or failed while in use.
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// The content URI is missing or uses a scheme the component cannot fetch.
    #[error("Content URI error: {0}")]
    ContentUri(String),

    /// Auto-detection finished without identifying the stream format.
    #[error("Format not detected: {0}")]
    FormatNotDetected(String),

    /// Malformed stream data.
    ///
    /// Non-fatal variants discard the current unit and keep going.
    #[error("Stream corrupt: {reason}")]
    StreamCorrupt { reason: String, fatal: bool },

    #[error("Incorrect state transition: {from} -> {to}")]
    IncorrectStateTransition { from: String, to: String },

    /// Operation not permitted in the current component or port state.
    #[error("Incorrect state operation: {0}")]
    IncorrectStateOperation(String),

    /// Two ports could not be tunnelled together.
    #[error("Ports not compatible: {0}")]
    PortsNotCompatible(String),

    /// Network-related error (connect, read, HTTP status).
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration or wiring error outside parameter validation.
    ///
    /// Examples:
    /// - Unknown component name in the registry
    /// - Missing required processor configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal operation.
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortKitError {
    /// The event code that represents this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BadParameter(_) => ErrorCode::BadParameter,
            Self::UnsupportedIndex(_) => ErrorCode::UnsupportedIndex,
            Self::InsufficientResources(_) => ErrorCode::InsufficientResources,
            Self::ContentUri(_) => ErrorCode::ContentUriError,
            Self::FormatNotDetected(_) => ErrorCode::FormatNotDetected,
            Self::StreamCorrupt { fatal: true, .. } => ErrorCode::StreamCorruptFatal,
            Self::StreamCorrupt { fatal: false, .. } => ErrorCode::StreamCorrupt,
            Self::IncorrectStateTransition { .. } => ErrorCode::IncorrectStateTransition,
            Self::IncorrectStateOperation(_) => ErrorCode::IncorrectStateOperation,
            Self::PortsNotCompatible(_) => ErrorCode::PortsNotCompatible,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Configuration(_) => ErrorCode::UnsupportedSetting,
            Self::Runtime(_) | Self::Io(_) => ErrorCode::Undefined,
        }
    }
}

/// Convenience type alias for Results using `PortKitError`.
pub type Result<T> = std::result::Result<T, PortKitError>;

impl From<PortKitError> for String {
    fn from(err: PortKitError) -> Self {
        err.to_string()
    }
}

// Generic string errors default to Runtime
impl From<String> for PortKitError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for PortKitError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}
