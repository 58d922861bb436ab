// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs a stdout subscriber at `level` for this library's logs.
///
/// Does nothing when the application already installed a global
/// subscriber, or when `level` is not a valid filter.
pub fn init(level: &str) {
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{level}");
    let filter = match EnvFilter::try_new(&env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("datadog-lambda: invalid log level {level}: {e}");
            return;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        debug!("Logging subsystem enabled");
    }
}
