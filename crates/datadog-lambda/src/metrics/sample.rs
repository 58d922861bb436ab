// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// A single distribution value recorded by the handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: f64,
    /// `key:value` tags, in the order they were given
    pub tags: Vec<String>,
    pub timestamp: SystemTime,
}

impl Sample {
    /// Creates a sample stamped with the current wall clock time.
    pub fn new(name: impl Into<String>, value: f64, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value,
            tags,
            timestamp: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Seconds since the Unix epoch. Clocks set before 1970 map to zero.
    pub fn unix_seconds(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    }
}
