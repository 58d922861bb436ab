// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::time::Instant;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use tracing::debug;

/// Echoes the event back, calling a downstream service when the event names one.
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let start = Instant::now();
    datadog_lambda::distribution("example.invocations", 1.0, &["handler:echo"]);

    if let Some(url) = event.payload.get("downstream_url").and_then(Value::as_str) {
        let client = reqwest::Client::new();
        let response = datadog_lambda::add_trace_headers(client.get(url))
            .send()
            .await?;
        debug!("Downstream call returned {}", response.status());
    }

    datadog_lambda::distribution(
        "example.latency_ms",
        start.elapsed().as_secs_f64() * 1000.0,
        &["handler:echo"],
    );

    Ok(json!({
        "request_id": event.context.request_id,
        "trace_headers": datadog_lambda::get_trace_headers(),
        "payload": event.payload,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(datadog_lambda::wrap_handler(handler, None))).await
}
