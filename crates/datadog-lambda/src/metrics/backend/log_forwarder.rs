// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes samples as log lines picked up by the Datadog log forwarder.
//!
//! ```json
//! {"m":"lambda.latency","v":12.5,"e":1700000000,"t":["env:prod"]}
//! ```

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryError;
use crate::metrics::backend::MetricsBackend;
use crate::metrics::batch::Batch;

#[derive(Serialize)]
struct LogLine<'a> {
    m: &'a str,
    v: f64,
    e: u64,
    t: &'a [String],
}

pub struct LogForwarder {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl LogForwarder {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl MetricsBackend for LogForwarder {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let mut out = Vec::new();
        for sample in batch.samples() {
            serde_json::to_writer(
                &mut out,
                &LogLine {
                    m: &sample.name,
                    v: sample.value,
                    e: sample.unix_seconds(),
                    t: &sample.tags,
                },
            )?;
            out.push(b'\n');
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError::Io(std::io::Error::other("log writer lock poisoned")))?;
        writer.write_all(&out)?;
        writer.flush()?;
        Ok(())
    }
}
