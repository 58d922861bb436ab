// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used by the API backend.
//!
//! A client is built once per wrapper and shared by every flush, so
//! connections to the intake are reused across invocations of a warm
//! execution environment.

use core::time::Duration;
use std::error::Error;

use tracing::error;

use crate::config::ResolvedConfig;

/// Builds the intake client.
///
/// An unusable proxy is logged and the client falls back to a direct
/// connection, then to reqwest defaults.
#[must_use]
pub fn get_client(config: &ResolvedConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to parse proxy configuration: {e}, falling back to direct connection");
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!("Failed to build HTTP client without proxy: {inner}, using reqwest defaults");
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &ResolvedConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.flush_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}
