// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distributed trace context for one invocation.
//!
//! The context is read once, when the invocation starts, from the first
//! carrier that holds a complete Datadog context:
//!
//! ```text
//! event.headers  (API Gateway, ALB, function URLs)
//!   ↓ not found
//! event          (direct invocations forwarding Datadog headers)
//!   ↓ not found
//! X-Ray header   (Lambda context, then `_X_AMZN_TRACE_ID`)
//!   ↓ not found
//! {}             (no trace context; not an error)
//! ```
//!
//! The resulting [`TraceHeaders`] are immutable and can be injected into
//! outbound requests with [`propagate`] to continue the trace downstream.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use carrier::{Extractor, Injector};
use error::Error;

pub mod carrier;
pub mod error;
pub mod xray;

/// Datadog trace id (64-bit, decimal).
pub const DATADOG_TRACE_ID_KEY: &str = "x-datadog-trace-id";

/// Datadog parent span id (64-bit, decimal).
pub const DATADOG_PARENT_ID_KEY: &str = "x-datadog-parent-id";

/// Sampling decision: -1 (user reject), 0 (auto reject), 1 (auto keep), 2 (user keep).
pub const DATADOG_SAMPLING_PRIORITY_KEY: &str = "x-datadog-sampling-priority";

/// Trace origin, e.g. `synthetics` or `rum`.
pub const DATADOG_ORIGIN_KEY: &str = "x-datadog-origin";

pub const USER_REJECT: i8 = -1;
pub const USER_KEEP: i8 = 2;

/// Canonical trace header name to value. Empty when the invocation was not
/// triggered by a traced caller.
pub type TraceHeaders = HashMap<String, String>;

const CARRIER: &str = "datadog";

lazy_static! {
    #[allow(clippy::expect_used)]
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

/// Reads the trace context of an invocation.
///
/// `xray_header` is the X-Ray header from the Lambda context, if any. When it
/// is absent the `_X_AMZN_TRACE_ID` environment variable is consulted.
pub fn extract(payload: &Value, xray_header: Option<&str>) -> TraceHeaders {
    if let Some(headers) = payload.get("headers") {
        match extract_datadog(headers) {
            Ok(trace_headers) => {
                debug!("Extracted trace context from event headers");
                return trace_headers;
            }
            Err(e) => debug!("{e}"),
        }
    }

    match extract_datadog(payload) {
        Ok(trace_headers) => {
            debug!("Extracted trace context from event payload");
            return trace_headers;
        }
        Err(e) => debug!("{e}"),
    }

    let env_header = std::env::var(xray::XRAY_TRACE_ENV_VAR).ok();
    if let Some(header) = xray_header.or(env_header.as_deref()) {
        match xray::extract(header) {
            Ok(trace_headers) => {
                debug!("Extracted trace context from X-Ray header");
                return trace_headers;
            }
            Err(e) => debug!("{e}"),
        }
    }

    debug!("No trace context found for this invocation");
    TraceHeaders::new()
}

/// Writes the trace headers onto an outbound carrier.
pub fn propagate(headers: &TraceHeaders, carrier: &mut dyn Injector) {
    for (key, value) in headers {
        carrier.set(key, value.clone());
    }
}

/// Reads Datadog headers from a carrier. Trace id and parent id are both
/// required; sampling priority and origin are copied when present.
pub fn extract_datadog(carrier: &dyn Extractor) -> Result<TraceHeaders, Error> {
    let trace_id = extract_id(carrier, &TRACE_ID)?;
    let parent_id = extract_id(carrier, &PARENT_ID)?;

    let mut headers = TraceHeaders::from([
        (DATADOG_TRACE_ID_KEY.to_string(), trace_id.to_string()),
        (DATADOG_PARENT_ID_KEY.to_string(), parent_id.to_string()),
    ]);

    if let Some(priority) = carrier.get(DATADOG_SAMPLING_PRIORITY_KEY) {
        match priority.trim().parse::<i8>() {
            Ok(priority) => {
                headers.insert(
                    DATADOG_SAMPLING_PRIORITY_KEY.to_string(),
                    priority.to_string(),
                );
            }
            Err(_) => debug!("Failed to decode `sampling_priority`: {priority}"),
        }
    }

    if let Some(origin) = carrier.get(DATADOG_ORIGIN_KEY).map(str::trim) {
        if !origin.is_empty() {
            headers.insert(DATADOG_ORIGIN_KEY.to_string(), origin.to_string());
        }
    }

    Ok(headers)
}

struct IdHeader {
    key: &'static str,
    missing: &'static str,
    invalid: &'static str,
    undecodable: &'static str,
}

const TRACE_ID: IdHeader = IdHeader {
    key: DATADOG_TRACE_ID_KEY,
    missing: "`trace_id` not found",
    invalid: "Invalid `trace_id` found",
    undecodable: "Failed to decode `trace_id`",
};

const PARENT_ID: IdHeader = IdHeader {
    key: DATADOG_PARENT_ID_KEY,
    missing: "`parent_id` not found",
    invalid: "Invalid `parent_id` found",
    undecodable: "Failed to decode `parent_id`",
};

/// Returns the trimmed header value once it is known to be a non-zero u64.
fn extract_id<'a>(carrier: &'a dyn Extractor, header: &IdHeader) -> Result<&'a str, Error> {
    let id = carrier
        .get(header.key)
        .map(str::trim)
        .ok_or(Error::extract(header.missing, CARRIER))?;

    if INVALID_SEGMENT_REGEX.is_match(id) {
        return Err(Error::extract(header.invalid, CARRIER));
    }

    id.parse::<u64>()
        .map_err(|_| Error::extract(header.undecodable, CARRIER))?;
    Ok(id)
}
