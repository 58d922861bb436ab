// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-invocation collector of distribution samples.
//!
//! ```text
//! Idle ──activate──▶ Active ──flush_and_close──▶ Flushing ──▶ Closed
//! ```
//!
//! While `Active`, samples are appended under a lock and, when a batch
//! interval is configured, a timer task periodically drains and delivers
//! them. `flush_and_close` stops the timer, delivers whatever is left and
//! closes the listener. Samples recorded outside `Active` are rejected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ResolvedConfig;
use crate::metrics::backend::MetricsBackend;
use crate::metrics::batch::Batch;
use crate::metrics::retry::{deliver_with_retry, RetryStrategy};
use crate::metrics::sample::Sample;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    Flushing,
    Closed,
}

#[derive(Clone, Copy, Debug)]
pub struct ListenerOptions {
    /// `Duration::ZERO` disables the timer
    pub batch_interval: Duration,
    pub flush_timeout: Duration,
    pub retry: RetryStrategy,
    /// When the invocation times out, if known
    pub deadline: Option<Instant>,
}

impl ListenerOptions {
    pub fn from_config(config: &ResolvedConfig, deadline: Option<Instant>) -> Self {
        Self {
            batch_interval: config.batch_interval,
            flush_timeout: config.flush_timeout,
            retry: RetryStrategy::from_flag(config.should_retry_on_failure),
            deadline,
        }
    }

    /// `min(now + flush_timeout, invocation deadline)`
    fn flush_deadline(&self) -> Instant {
        let deadline = Instant::now() + self.flush_timeout;
        match self.deadline {
            Some(invocation_deadline) => deadline.min(invocation_deadline),
            None => deadline,
        }
    }
}

struct State {
    phase: Phase,
    batch: Batch,
}

pub struct MetricsListener {
    state: Arc<Mutex<State>>,
    backend: Option<Arc<dyn MetricsBackend>>,
    options: ListenerOptions,
    cancel_token: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

#[allow(clippy::expect_used)]
impl MetricsListener {
    /// Creates an `Idle` listener. `backend` is `None` in degraded mode:
    /// samples are accepted and discarded.
    pub fn new(backend: Option<Arc<dyn MetricsBackend>>, options: ListenerOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                phase: Phase::Idle,
                batch: Batch::new(),
            })),
            backend,
            options,
            cancel_token: CancellationToken::new(),
            timer: Mutex::new(None),
        }
    }

    /// Creates a listener and activates it.
    pub fn start(backend: Option<Arc<dyn MetricsBackend>>, options: ListenerOptions) -> Self {
        let listener = Self::new(backend, options);
        listener.activate();
        listener
    }

    /// Moves an `Idle` listener to `Active` and starts the batch timer.
    pub fn activate(&self) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.phase != Phase::Idle {
                debug!("Listener already started, phase {:?}", state.phase);
                return;
            }
            state.phase = Phase::Active;
        }

        let Some(backend) = self.backend.clone() else {
            return;
        };
        if self.options.batch_interval.is_zero() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime, metrics will only be sent at the end of the invocation");
            return;
        }

        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.state),
            backend,
            self.options,
            self.cancel_token.clone(),
        ));
        *self.timer.lock().expect("lock poisoned") = Some(handle);
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().expect("lock poisoned").phase
    }

    /// Samples recorded and not yet drained.
    pub fn pending(&self) -> usize {
        self.state.lock().expect("lock poisoned").batch.len()
    }

    /// Records one distribution value. Safe to call from concurrent tasks.
    /// NaN and infinite values are dropped.
    pub fn add_distribution(&self, name: &str, value: f64, tags: &[&str]) {
        if !value.is_finite() {
            error!("Dropping metric {name}: value {value} is not finite");
            return;
        }
        let mut state = self.state.lock().expect("lock poisoned");
        if state.phase != Phase::Active {
            error!(
                "Dropping metric {name}: listener is {:?}, not active",
                state.phase
            );
            return;
        }
        if self.backend.is_none() {
            debug!("Dropping metric {name}: no metrics backend configured");
            return;
        }
        state.batch.push(Sample::new(
            name,
            value,
            tags.iter().map(|tag| (*tag).to_string()).collect(),
        ));
    }

    /// Stops the timer, delivers the remaining samples and closes the
    /// listener. Calls after the first are no-ops.
    ///
    /// Waiting for an in-flight timer delivery and the final delivery share
    /// one flush deadline; a timer still running at the deadline is aborted.
    pub async fn flush_and_close(&self) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            match state.phase {
                Phase::Active => state.phase = Phase::Flushing,
                Phase::Idle => {
                    state.phase = Phase::Closed;
                    return;
                }
                Phase::Flushing | Phase::Closed => return,
            }
        }

        let deadline = self.options.flush_deadline();
        self.cancel_token.cancel();
        let timer = self.timer.lock().expect("lock poisoned").take();
        if let Some(mut timer) = timer {
            match timeout_at(deadline, &mut timer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Metrics batch timer failed: {e}"),
                Err(_) => {
                    timer.abort();
                    warn!("Metrics batch timer still delivering at the flush deadline, aborted");
                }
            }
        }

        let batch = drain(&self.state);
        if let Some(backend) = &self.backend {
            if !batch.is_empty() {
                deliver(backend.as_ref(), &batch, self.options.retry, deadline).await;
            }
        }

        self.state.lock().expect("lock poisoned").phase = Phase::Closed;
    }
}

impl Drop for MetricsListener {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[allow(clippy::expect_used)]
fn drain(state: &Mutex<State>) -> Batch {
    state.lock().expect("lock poisoned").batch.take()
}

async fn deliver(
    backend: &dyn MetricsBackend,
    batch: &Batch,
    retry: RetryStrategy,
    deadline: Instant,
) {
    match deliver_with_retry(backend, batch, retry, deadline).await {
        Ok(()) => debug!("Flushed {} samples", batch.len()),
        Err(e) => error!("Failed to flush {} samples: {e}", batch.len()),
    }
}

async fn run_timer(
    state: Arc<Mutex<State>>,
    backend: Arc<dyn MetricsBackend>,
    options: ListenerOptions,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval_at(
        Instant::now() + options.batch_interval,
        options.batch_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("Metrics batch timer stopped");
                break;
            }
            _ = ticker.tick() => {
                let batch = drain(&state);
                if batch.is_empty() {
                    continue;
                }
                deliver(backend.as_ref(), &batch, options.retry, options.flush_deadline()).await;
            }
        }
    }
}
