// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carrier traits for trace context propagation.
//!
//! Carriers abstract over the places trace headers travel in: HTTP headers
//! of an outbound request, the `headers` object of an API Gateway event, or
//! a plain map handed around by the application.
//!
//! All implementations match keys case-insensitively, since HTTP header
//! names arrive as `X-Datadog-Trace-Id` from some sources and
//! `x-datadog-trace-id` from others.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

/// Writes trace headers onto an outbound carrier.
pub trait Injector {
    /// Sets a key-value pair in the carrier. Keys are stored lowercase.
    fn set(&mut self, key: &str, value: String);
}

/// Reads trace headers from an inbound carrier.
pub trait Extractor {
    /// Gets a value from the carrier by key (case-insensitive).
    fn get(&self, key: &str) -> Option<&str>;

    /// Gets all keys present in the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = HashMap::get(self, key) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        HashMap::keys(self).map(String::as_str).collect::<Vec<_>>()
    }
}

/// Only `Value::Object` carries headers; other variants are ignored on
/// write and empty on read.
impl Injector for Value {
    fn set(&mut self, key: &str, value: String) {
        if let Value::Object(map) = self {
            map.insert(key.to_lowercase(), Value::String(value));
        }
    }
}

impl Extractor for Value {
    fn get(&self, key: &str) -> Option<&str> {
        let Value::Object(map) = self else {
            return None;
        };
        map.get(key)
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .and_then(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        if let Value::Object(map) = self {
            map.keys().map(String::as_str).collect::<Vec<_>>()
        } else {
            Vec::new()
        }
    }
}

/// `HeaderMap` names are already case-insensitive.
impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.to_lowercase().as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping invalid header name {key}: {e}");
                return;
            }
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                self.insert(name, value);
            }
            Err(e) => debug!("Skipping invalid value for header {key}: {e}"),
        }
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        HeaderMap::keys(self).map(HeaderName::as_str).collect::<Vec<_>>()
    }
}
