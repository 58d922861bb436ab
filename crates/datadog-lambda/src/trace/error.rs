// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while reading trace context from a carrier.
//!
//! They never leave the `trace` module: a carrier that fails to parse is
//! logged at debug level and the next carrier is tried. An invocation
//! without usable context simply starts with an empty header set.

use thiserror::Error;

/// Error during trace context extraction.
///
/// Formatted as `"Cannot extract from {carrier}: {message}"`.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot extract from {carrier}: {message}")]
pub struct Error {
    message: &'static str,
    /// `"datadog"` or `"xray"`
    carrier: &'static str,
}

impl Error {
    #[must_use]
    pub fn extract(message: &'static str, carrier: &'static str) -> Self {
        Self { message, carrier }
    }
}
