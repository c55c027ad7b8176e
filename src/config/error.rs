// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the configuration module.

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested configuration key was not found.
    #[error("configuration key not found")]
    NotFound,

    /// An error occurred while parsing or deserializing a configuration value.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// An IO error occurred (e.g., while reading a configuration file).
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// An error related to a specific configuration provider.
    #[error("provider error: {provider}: {message}")]
    ProviderError { provider: String, message: String },

    /// The plugin configuration payload is not valid JSON for the schema.
    #[error("the plugin configuration is not a valid json ({reason}): {payload:?}")]
    MalformedPayload { reason: String, payload: String },

    /// A non-empty plugin configuration payload carried no target prefixes.
    #[error("the plugin configuration is missing targetURLPrefixes: {payload:?}")]
    MissingTargetPrefixes { payload: String },

    /// After clamping, the status code range is inverted.
    #[error("the plugin configuration has an empty status range: start {start} > end {end}")]
    InvalidStatusRange { start: i64, end: i64 },

    /// A generic error.
    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    /// Create a new provider error.
    pub fn provider_error<P: fmt::Display, M: fmt::Display>(provider: P, message: M) -> Self {
        Self::ProviderError {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a malformed payload error, keeping the raw bytes for diagnostics.
    pub fn malformed_payload<R: fmt::Display>(reason: R, payload: &[u8]) -> Self {
        Self::MalformedPayload {
            reason: reason.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    /// Create a missing prefixes error, keeping the raw bytes for diagnostics.
    pub fn missing_target_prefixes(payload: &[u8]) -> Self {
        Self::MissingTargetPrefixes {
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_config_error_not_found() {
        let error = ConfigError::NotFound;
        assert_eq!(error.to_string(), "configuration key not found");
    }

    #[test]
    fn test_config_error_parse_error() {
        let error = ConfigError::ParseError("invalid JSON".to_string());
        assert_eq!(
            error.to_string(),
            "failed to parse configuration: invalid JSON"
        );
    }

    #[test]
    fn test_config_error_io_error_from_conversion() {
        let io_error = IoError::new(ErrorKind::PermissionDenied, "access denied");
        let error: ConfigError = io_error.into();

        match error {
            ConfigError::IoError(ref e) => {
                assert_eq!(e.kind(), ErrorKind::PermissionDenied);
                assert_eq!(e.to_string(), "access denied");
            }
            _ => panic!("Expected IoError variant"),
        }
        assert!(error.source().is_some());
    }

    #[test]
    fn test_config_error_provider_error_constructor() {
        let error = ConfigError::provider_error("file", "invalid format");

        match &error {
            ConfigError::ProviderError { provider, message } => {
                assert_eq!(provider, "file");
                assert_eq!(message, "invalid format");
            }
            _ => panic!("Expected ProviderError variant"),
        }

        assert_eq!(error.to_string(), "provider error: file: invalid format");
    }

    #[test]
    fn test_malformed_payload_keeps_raw_bytes() {
        let error = ConfigError::malformed_payload("expected value", b"{not json");

        match &error {
            ConfigError::MalformedPayload { reason, payload } => {
                assert_eq!(reason, "expected value");
                assert_eq!(payload, "{not json");
            }
            _ => panic!("Expected MalformedPayload variant"),
        }
        assert!(error.to_string().contains("{not json"));
    }

    #[test]
    fn test_missing_target_prefixes_message() {
        let error = ConfigError::missing_target_prefixes(br#"{"problemTitle":"oops"}"#);
        assert_eq!(
            error.to_string(),
            r#"the plugin configuration is missing targetURLPrefixes: "{\"problemTitle\":\"oops\"}""#
        );
    }

    #[test]
    fn test_invalid_status_range_message() {
        let error = ConfigError::InvalidStatusRange { start: 600, end: 599 };
        assert_eq!(
            error.to_string(),
            "the plugin configuration has an empty status range: start 600 > end 599"
        );
    }

    #[test]
    fn test_config_error_no_source() {
        let error = ConfigError::NotFound;
        assert!(error.source().is_none());
    }
}
