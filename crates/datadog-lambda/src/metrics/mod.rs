// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distribution metrics recorded by a handler and shipped when the
//! invocation ends, or earlier on a timer.

pub mod backend;
pub mod batch;
pub mod listener;
pub mod retry;
pub mod sample;

pub use backend::MetricsBackend;
pub use batch::Batch;
pub use listener::{ListenerOptions, MetricsListener, Phase};
pub use sample::Sample;
