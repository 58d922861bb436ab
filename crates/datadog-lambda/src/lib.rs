// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datadog instrumentation for AWS Lambda handlers.
//!
//! Wrap a handler to get, for every invocation:
//! - distributed trace context read from the triggering event,
//! - distribution metrics recorded with [`distribution`] and shipped to
//!   Datadog, directly or through the log forwarder, before the
//!   invocation returns.
//!
//! ```rust,ignore
//! use lambda_runtime::{service_fn, Error, LambdaEvent};
//! use serde_json::Value;
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     datadog_lambda::distribution("orders.processed", 1.0, &["env:prod"]);
//!     Ok(event.payload)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     lambda_runtime::run(service_fn(datadog_lambda::wrap_handler(handler, None))).await
//! }
//! ```
//!
//! Configuration comes from [`Config`] and the `DD_*` environment variables.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::future::Future;
use std::sync::Arc;

use lambda_runtime::LambdaEvent;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::error;

pub mod api_key;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod trace;
pub mod wrapper;

pub use config::Config;
pub use context::InvocationContext;
pub use trace::TraceHeaders;
pub use wrapper::{BoxFuture, Wrapper};

/// Wraps `handler` with the given configuration, or the environment alone
/// when `config` is `None`.
pub fn wrap_handler<F, Fut, E, R, Er>(
    handler: F,
    config: Option<Config>,
) -> impl Fn(LambdaEvent<E>) -> BoxFuture<Result<R, Er>>
where
    F: Fn(LambdaEvent<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Er>> + Send + 'static,
    E: Serialize + Send + 'static,
    R: Send + 'static,
    Er: Send + 'static,
{
    Wrapper::new(config.unwrap_or_default().resolve()).wrap(handler)
}

/// Wraps a handler that takes the invocation context explicitly.
pub fn wrap_handler_with_context<F, Fut, E, R, Er>(
    handler: F,
    config: Option<Config>,
) -> impl Fn(LambdaEvent<E>) -> BoxFuture<Result<R, Er>>
where
    F: Fn(LambdaEvent<E>, Arc<InvocationContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Er>> + Send + 'static,
    E: Serialize + Send + 'static,
    R: Send + 'static,
    Er: Send + 'static,
{
    Wrapper::new(config.unwrap_or_default().resolve()).wrap_with_context(handler)
}

/// Trace headers of the current invocation; empty outside an invocation or
/// when the event carried no trace context.
pub fn get_trace_headers() -> TraceHeaders {
    context::current()
        .map(|context| context.trace_headers().clone())
        .unwrap_or_default()
}

/// Adds the current trace headers to an outbound request.
pub fn add_trace_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let mut headers = HeaderMap::new();
    trace::propagate(&get_trace_headers(), &mut headers);
    request.headers(headers)
}

/// The current invocation's context, for manual propagation.
pub fn get_context() -> Option<Arc<InvocationContext>> {
    context::current()
}

/// Records a distribution value on the current invocation.
///
/// Outside an invocation the value is dropped and an error is logged.
pub fn distribution(name: &str, value: f64, tags: &[&str]) {
    match context::current() {
        Some(context) => context.distribution(name, value, tags),
        None => error!("couldn't get metrics listener from current context"),
    }
}
