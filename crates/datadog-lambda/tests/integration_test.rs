// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use datadog_lambda::{
    config::Config,
    error::DeliveryError,
    metrics::{backend::log_forwarder::LogForwarder, Batch, MetricsBackend},
    wrap_handler, Wrapper,
};
use lambda_runtime::{Context, LambdaEvent};
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use serial_test::serial;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("lock").clone();
        String::from_utf8(bytes)
            .expect("utf8")
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct BatchSizes(Mutex<Vec<usize>>);

#[async_trait]
impl MetricsBackend for BatchSizes {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        self.0.lock().expect("lock").push(batch.len());
        Ok(())
    }
}

fn clear_api_key_env() {
    std::env::remove_var("DD_API_KEY");
    std::env::remove_var("DD_KMS_API_KEY");
    std::env::remove_var("DD_FLUSH_TO_LOG");
}

fn api_config(server: &Server, should_retry_on_failure: bool) -> Config {
    Config {
        api_key: Some("mock-api-key".to_string()),
        dd_url: Some(server.url()),
        batch_interval: Some(Duration::ZERO),
        should_retry_on_failure,
        ..Default::default()
    }
}

fn event(payload: Value) -> LambdaEvent<Value> {
    LambdaEvent::new(payload, Context::default())
}

async fn record_three(_event: LambdaEvent<Value>) -> Result<Value, String> {
    for _ in 0..3 {
        datadog_lambda::distribution("test.metric", 1.0, &["env:test"]);
    }
    Ok(json!({ "status": "ok" }))
}

#[tokio::test]
#[serial]
async fn test_metrics_are_shipped_to_api_before_returning() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/distribution_points")
        .match_header("DD-API-KEY", "mock-api-key")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "series": [{
                "metric": "test.metric",
                "tags": ["env:test"],
                "type": "distribution"
            }]
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let wrapped = wrap_handler(record_three, Some(api_config(&server, false)));
    let result = wrapped(event(json!({}))).await;

    assert_eq!(result, Ok(json!({ "status": "ok" })));
    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_failed_delivery_without_retry_is_attempted_once() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/distribution_points")
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(1)
        .create_async()
        .await;

    let wrapped = wrap_handler(record_three, Some(api_config(&server, false)));
    let result = wrapped(event(json!({}))).await;

    assert_eq!(result, Ok(json!({ "status": "ok" })));
    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_failed_delivery_with_retry_is_bounded() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/distribution_points")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let wrapped = wrap_handler(record_three, Some(api_config(&server, true)));
    let result = wrapped(event(json!({}))).await;

    assert_eq!(result, Ok(json!({ "status": "ok" })));
    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_permanent_rejection_is_not_retried() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/distribution_points")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let wrapped = wrap_handler(record_three, Some(api_config(&server, true)));
    wrapped(event(json!({}))).await.expect("handler succeeds");

    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_handler_error_survives_delivery_failure() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v1/distribution_points")
        .with_status(500)
        .create_async()
        .await;

    let wrapped = wrap_handler(
        |_event: LambdaEvent<Value>| async move {
            datadog_lambda::distribution("test.metric", 1.0, &[]);
            Err::<Value, _>("order not found".to_string())
        },
        Some(api_config(&server, false)),
    );

    assert_eq!(
        wrapped(event(json!({}))).await,
        Err("order not found".to_string())
    );
}

#[tokio::test]
#[serial]
async fn test_no_api_key_means_no_delivery() {
    clear_api_key_env();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = Config {
        dd_url: Some(server.url()),
        batch_interval: Some(Duration::from_millis(5)),
        ..Default::default()
    };
    let wrapped = wrap_handler(record_three, Some(config));
    let result = wrapped(event(json!({}))).await;

    assert_eq!(result, Ok(json!({ "status": "ok" })));
    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_log_forwarder_writes_one_line_per_sample() {
    clear_api_key_env();
    let buffer = SharedBuffer::default();
    let config = Config {
        should_use_log_forwarder: true,
        batch_interval: Some(Duration::ZERO),
        ..Default::default()
    }
    .resolve();
    assert!(config.should_use_log_forwarder);

    let observed = buffer.clone();
    let wrapped = Wrapper::new(config)
        .with_backend(Arc::new(LogForwarder::new(Box::new(buffer.clone()))))
        .wrap(move |event: LambdaEvent<Value>| {
            let observed = observed.clone();
            async move {
                let result = record_three(event).await;
                assert!(observed.lines().is_empty(), "nothing written before flush");
                result
            }
        });

    let result = wrapped(event(json!({}))).await;
    assert_eq!(result, Ok(json!({ "status": "ok" })));

    let lines = buffer.lines();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let parsed: Value = serde_json::from_str(&line).expect("json line");
        assert_eq!(parsed["m"], "test.metric");
        assert_eq!(parsed["v"], 1.0);
        assert_eq!(parsed["t"], json!(["env:test"]));
        assert!(parsed["e"].as_u64().is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_distributions_are_all_delivered() {
    clear_api_key_env();
    let backend = Arc::new(BatchSizes::default());
    let config = Config {
        batch_interval: Some(Duration::from_millis(5)),
        ..Default::default()
    }
    .resolve();

    let wrapped = Wrapper::new(config)
        .with_backend(backend.clone())
        .wrap(|_event: LambdaEvent<Value>| async move {
            let mut tasks = Vec::new();
            for task in 0..10 {
                tasks.push(tokio::spawn(async move {
                    for i in 0..25 {
                        datadog_lambda::distribution(
                            "concurrent.metric",
                            f64::from(task * 25 + i),
                            &["env:test"],
                        );
                        if i % 5 == 0 {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                }));
            }
            for task in tasks {
                task.await.map_err(|e| e.to_string())?;
            }
            Ok::<(), String>(())
        });

    wrapped(event(json!({}))).await.expect("handler succeeds");

    let delivered: usize = backend.0.lock().expect("lock").iter().sum();
    assert_eq!(delivered, 250);
}

#[tokio::test]
#[serial]
async fn test_batch_interval_flushes_partially_then_finally() {
    clear_api_key_env();
    let backend = Arc::new(BatchSizes::default());
    let config = Config {
        batch_interval: Some(Duration::from_millis(30)),
        ..Default::default()
    }
    .resolve();

    let wrapped = Wrapper::new(config)
        .with_backend(backend.clone())
        .wrap(|_event: LambdaEvent<Value>| async move {
            datadog_lambda::distribution("interval.metric", 1.0, &[]);
            datadog_lambda::distribution("interval.metric", 2.0, &[]);
            tokio::time::sleep(Duration::from_millis(150)).await;
            datadog_lambda::distribution("interval.metric", 3.0, &[]);
            Ok::<(), String>(())
        });

    wrapped(event(json!({}))).await.expect("handler succeeds");

    let sizes = backend.0.lock().expect("lock").clone();
    assert!(sizes.len() >= 2, "partial and final flush: {sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), 3);
    assert_eq!(sizes.last(), Some(&1));
}

#[tokio::test]
#[serial]
async fn test_trace_headers_are_extracted_per_invocation() {
    clear_api_key_env();
    std::env::remove_var("_X_AMZN_TRACE_ID");
    let config = Config {
        batch_interval: Some(Duration::ZERO),
        ..Default::default()
    };
    let wrapped = wrap_handler(
        |_event: LambdaEvent<Value>| async move {
            Ok::<_, String>(datadog_lambda::get_trace_headers())
        },
        Some(config),
    );

    let traced = wrapped(event(json!({
        "headers": { "x-datadog-trace-id": "123", "x-datadog-parent-id": "456" }
    })))
    .await
    .expect("handler succeeds");
    assert_eq!(traced.len(), 2);
    assert_eq!(traced["x-datadog-trace-id"], "123");
    assert_eq!(traced["x-datadog-parent-id"], "456");

    let untraced = wrapped(event(json!({ "body": "no context" })))
        .await
        .expect("handler succeeds");
    assert!(untraced.is_empty());
}
