// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handler instrumentation.
//!
//! Every invocation of a wrapped handler goes through the same steps:
//!
//! 1. read the trace context from the event,
//! 2. start a metrics listener bound to the invocation deadline,
//! 3. publish both as the current [`InvocationContext`],
//! 4. run the handler, catching panics,
//! 5. flush and close the listener,
//! 6. hand back the handler's result, or resume its panic.
//!
//! Telemetry failures are logged in step 5 and never change the outcome.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use lambda_runtime::LambdaEvent;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::context::{self, InvocationContext};
use crate::logger;
use crate::metrics::backend::{self, MetricsBackend};
use crate::metrics::{ListenerOptions, MetricsListener};
use crate::trace;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Instruments handlers with one resolved configuration.
///
/// The delivery backend, and its HTTP client, are built once here and
/// shared by every invocation of the handlers it wraps.
#[derive(Clone)]
pub struct Wrapper {
    config: Arc<ResolvedConfig>,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl Wrapper {
    pub fn new(config: ResolvedConfig) -> Self {
        if config.debug_logging {
            logger::init(config.log_level());
        }
        let backend = backend::from_config(&config);
        debug!("Wrapping handler with {config:?}");
        Self {
            config: Arc::new(config),
            backend,
        }
    }

    /// Replaces the backend selected from the configuration.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn MetricsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Wraps `handler`. The returned closure has the same shape and can be
    /// handed to `lambda_runtime::service_fn`.
    pub fn wrap<F, Fut, E, R, Er>(
        self,
        handler: F,
    ) -> impl Fn(LambdaEvent<E>) -> BoxFuture<Result<R, Er>>
    where
        F: Fn(LambdaEvent<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Er>> + Send + 'static,
        E: Serialize + Send + 'static,
        R: Send + 'static,
        Er: Send + 'static,
    {
        self.wrap_with_context(move |event: LambdaEvent<E>, _context: Arc<InvocationContext>| {
            handler(event)
        })
    }

    /// Like [`Wrapper::wrap`], also handing the invocation context to the
    /// handler instead of relying on [`context::current`].
    pub fn wrap_with_context<F, Fut, E, R, Er>(
        self,
        handler: F,
    ) -> impl Fn(LambdaEvent<E>) -> BoxFuture<Result<R, Er>>
    where
        F: Fn(LambdaEvent<E>, Arc<InvocationContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Er>> + Send + 'static,
        E: Serialize + Send + 'static,
        R: Send + 'static,
        Er: Send + 'static,
    {
        let wrapper = Arc::new(self);
        let handler = Arc::new(handler);
        move |event: LambdaEvent<E>| {
            let wrapper = Arc::clone(&wrapper);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let context = wrapper.start_invocation(&event);

                let invocation_context = Arc::clone(&context);
                let outcome = AssertUnwindSafe(async move {
                    (*handler)(event, invocation_context).await
                })
                .catch_unwind()
                .await;

                context.listener().flush_and_close().await;

                match outcome {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            })
        }
    }

    fn start_invocation<E: Serialize>(&self, event: &LambdaEvent<E>) -> Arc<InvocationContext> {
        let payload = match serde_json::to_value(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Failed to inspect event payload for trace context: {e}");
                Value::Null
            }
        };
        let trace_headers = trace::extract(&payload, event.context.xray_trace_id.as_deref());

        let deadline = invocation_deadline(event.context.deadline);
        let listener = MetricsListener::start(
            self.backend.clone(),
            ListenerOptions::from_config(&self.config, deadline),
        );

        let context = Arc::new(InvocationContext::new(
            event.context.request_id.clone(),
            trace_headers,
            Arc::new(listener),
            event.context.clone(),
        ));
        context::set_current(Arc::clone(&context));
        debug!("Started invocation {}", event.context.request_id);
        context
    }
}

/// Converts the runtime's deadline (ms since the epoch, 0 when unknown)
/// into a monotonic instant.
fn invocation_deadline(deadline_ms: u64) -> Option<Instant> {
    if deadline_ms == 0 {
        return None;
    }
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
    let remaining = deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(Instant::now() + remaining)
}
