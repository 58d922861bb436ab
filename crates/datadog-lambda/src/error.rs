// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors raised on the telemetry path.
//!
//! None of these ever reach the wrapped handler: the listener logs them and
//! moves on, so a failing intake costs metrics, never the invocation.

use reqwest::StatusCode;

/// Errors that can occur while delivering a batch of distribution samples
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{status}: Failed to push to API: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to resolve API key")]
    MissingApiKey,

    #[error("Failed to write metric line: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery deadline exceeded")]
    DeadlineExceeded,
}

impl DeliveryError {
    /// Whether another attempt could succeed.
    ///
    /// Network failures, 5xx and 429 responses are transient. Every other
    /// status is a permanent rejection of the payload or the key.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Serialization(_) | Self::MissingApiKey | Self::Io(_) | Self::DeadlineExceeded => {
                false
            }
        }
    }
}

/// Errors returned by a [`crate::api_key::KeyDecrypter`]
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Encrypted API key is not valid: {0}")]
    InvalidCiphertext(String),

    #[error("Key management service call failed: {0}")]
    Service(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let server_error = DeliveryError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(server_error.is_retryable());

        let throttled = DeliveryError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(throttled.is_retryable());

        let forbidden = DeliveryError::Status {
            status: StatusCode::FORBIDDEN,
            body: "invalid key".to_string(),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!DeliveryError::MissingApiKey.is_retryable());
        assert!(!DeliveryError::DeadlineExceeded.is_retryable());
        let io = DeliveryError::Io(std::io::Error::other("closed"));
        assert!(!io.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = DeliveryError::Status {
            status: StatusCode::FORBIDDEN,
            body: "denied".to_string(),
        };
        assert_eq!(error.to_string(), "403 Forbidden: Failed to push to API: denied");

        let error = DecryptError::Service("throttled".to_string());
        assert_eq!(
            error.to_string(),
            "Key management service call failed: throttled"
        );
    }
}
