// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Helper functions for parsing component configuration from JSON values.

pub mod config_helpers {
    use crate::error::PortKitError;
    use serde::Deserialize;

    /// Parses configuration from an optional JSON value, using defaults if not provided.
    /// This is the preferred approach for components with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `PortKitError::Configuration` if a value is present but does not parse.
    pub fn parse_config_optional<T>(params: Option<&serde_json::Value>) -> Result<T, PortKitError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        match params {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| PortKitError::Configuration(format!("Failed to parse config: {e}"))),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[derive(Debug, Default, Deserialize, PartialEq)]
        #[serde(default)]
        struct Cfg {
            bitrate: u32,
        }

        #[test]
        fn test_optional_defaults_and_rejects_garbage() {
            let cfg: Cfg = parse_config_optional(None).unwrap();
            assert_eq!(cfg, Cfg::default());
            let cfg: Cfg = parse_config_optional(Some(&serde_json::Value::Null)).unwrap();
            assert_eq!(cfg, Cfg::default());
            let value = serde_json::json!({ "bitrate": 128 });
            let cfg: Cfg = parse_config_optional(Some(&value)).unwrap();
            assert_eq!(cfg.bitrate, 128);
            let bad = serde_json::json!({ "bitrate": "fast" });
            assert!(parse_config_optional::<Cfg>(Some(&bad)).is_err());
        }
    }
}
