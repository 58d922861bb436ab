// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The invocation currently being handled.
//!
//! The wrapper publishes a context when an invocation starts; library
//! functions such as [`crate::distribution`] read it back. Lambda runs one
//! invocation at a time per execution environment, so a single slot is
//! enough. The slot keeps the last context after the invocation ends: late
//! calls reach a closed listener and are rejected there.

use std::sync::{Arc, RwLock};

use crate::metrics::MetricsListener;
use crate::trace::TraceHeaders;

static CURRENT: RwLock<Option<Arc<InvocationContext>>> = RwLock::new(None);

pub struct InvocationContext {
    request_id: String,
    trace_headers: TraceHeaders,
    listener: Arc<MetricsListener>,
    lambda_context: lambda_runtime::Context,
}

impl InvocationContext {
    pub fn new(
        request_id: String,
        trace_headers: TraceHeaders,
        listener: Arc<MetricsListener>,
        lambda_context: lambda_runtime::Context,
    ) -> Self {
        Self {
            request_id,
            trace_headers,
            listener,
            lambda_context,
        }
    }

    /// Records a distribution value on this invocation's listener.
    pub fn distribution(&self, name: &str, value: f64, tags: &[&str]) {
        self.listener.add_distribution(name, value, tags);
    }

    /// Trace headers extracted when the invocation started.
    pub fn trace_headers(&self) -> &TraceHeaders {
        &self.trace_headers
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn lambda_context(&self) -> &lambda_runtime::Context {
        &self.lambda_context
    }

    pub fn listener(&self) -> &Arc<MetricsListener> {
        &self.listener
    }
}

/// Publishes `context` as the current invocation. Last writer wins.
pub(crate) fn set_current(context: Arc<InvocationContext>) {
    match CURRENT.write() {
        Ok(mut slot) => *slot = Some(context),
        Err(poisoned) => *poisoned.into_inner() = Some(context),
    }
}

/// The most recently started invocation, if any.
pub fn current() -> Option<Arc<InvocationContext>> {
    match CURRENT.read() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
pub(crate) fn clear_current() {
    if let Ok(mut slot) = CURRENT.write() {
        *slot = None;
    }
}
