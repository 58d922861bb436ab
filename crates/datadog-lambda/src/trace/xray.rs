// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS X-Ray trace header conversion.
//!
//! Lambda always starts an X-Ray segment, so when the event itself carries no
//! Datadog headers the X-Ray context is the root of the trace:
//!
//! ```text
//! Root=1-5ce31dc2-2c779014b90ce44db5e03875;Parent=53995c3f42cd8ad8;Sampled=1
//! ```
//!
//! Datadog ids are 64-bit decimal integers. The trace id keeps the low 63 bits
//! of the last 16 hex digits of the root id, the parent id is the 16 hex
//! digit entity id.

use lazy_static::lazy_static;
use regex::Regex;

use crate::trace::error::Error;
use crate::trace::{
    TraceHeaders, DATADOG_PARENT_ID_KEY, DATADOG_SAMPLING_PRIORITY_KEY, DATADOG_TRACE_ID_KEY,
    USER_KEEP, USER_REJECT,
};

/// Environment variable the Lambda runtime sets for each invocation.
pub const XRAY_TRACE_ENV_VAR: &str = "_X_AMZN_TRACE_ID";

const CARRIER: &str = "xray";

lazy_static! {
    /// `1-{8 hex epoch}-{24 hex random}`
    #[allow(clippy::expect_used)]
    static ref ROOT_REGEX: Regex =
        Regex::new(r"^1-[0-9a-fA-F]{8}-([0-9a-fA-F]{24})$").expect("failed creating regex");

    #[allow(clippy::expect_used)]
    static ref PARENT_REGEX: Regex =
        Regex::new(r"^[0-9a-fA-F]{16}$").expect("failed creating regex");
}

/// Converts an X-Ray trace header into Datadog trace headers.
pub fn extract(header: &str) -> Result<TraceHeaders, Error> {
    let mut root = None;
    let mut parent = None;
    let mut sampled = None;

    for part in header.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "Root" => root = Some(value.trim()),
            "Parent" => parent = Some(value.trim()),
            "Sampled" => sampled = Some(value.trim()),
            _ => {}
        }
    }

    let root = root.ok_or(Error::extract("`Root` not found", CARRIER))?;
    let parent = parent.ok_or(Error::extract("`Parent` not found", CARRIER))?;

    let trace_id = convert_root_to_trace_id(root)?;
    let parent_id = convert_entity_to_parent_id(parent)?;
    let sampling_priority = if sampled == Some("1") {
        USER_KEEP
    } else {
        USER_REJECT
    };

    Ok(TraceHeaders::from([
        (DATADOG_TRACE_ID_KEY.to_string(), trace_id.to_string()),
        (DATADOG_PARENT_ID_KEY.to_string(), parent_id.to_string()),
        (
            DATADOG_SAMPLING_PRIORITY_KEY.to_string(),
            sampling_priority.to_string(),
        ),
    ]))
}

fn convert_root_to_trace_id(root: &str) -> Result<u64, Error> {
    let captures = ROOT_REGEX
        .captures(root)
        .ok_or(Error::extract("Invalid `Root` format", CARRIER))?;
    let random = &captures[1];
    let low_bits = u64::from_str_radix(&random[8..], 16)
        .map_err(|_| Error::extract("Failed to decode `Root`", CARRIER))?;
    let trace_id = low_bits & 0x7FFF_FFFF_FFFF_FFFF;
    if trace_id == 0 {
        return Err(Error::extract("Invalid `Root` found", CARRIER));
    }
    Ok(trace_id)
}

fn convert_entity_to_parent_id(parent: &str) -> Result<u64, Error> {
    if !PARENT_REGEX.is_match(parent) {
        return Err(Error::extract("Invalid `Parent` format", CARRIER));
    }
    let parent_id = u64::from_str_radix(parent, 16)
        .map_err(|_| Error::extract("Failed to decode `Parent`", CARRIER))?;
    if parent_id == 0 {
        return Err(Error::extract("Invalid `Parent` found", CARRIER));
    }
    Ok(parent_id)
}
