// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where flushed batches go.
//!
//! The backend is chosen once per wrapper:
//! - [`log_forwarder::LogForwarder`] when log forwarding is enabled,
//! - [`api::ApiBackend`] when an API key is configured,
//! - nothing otherwise. Samples are then discarded at the listener.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::api_key::ApiKeyFactory;
use crate::config::{ApiKey, ResolvedConfig};
use crate::error::DeliveryError;
use crate::http;
use crate::metrics::batch::Batch;

pub mod api;
pub mod log_forwarder;

#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Delivers one batch. A single attempt; retries are the caller's concern.
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

pub fn from_config(config: &ResolvedConfig) -> Option<Arc<dyn MetricsBackend>> {
    if config.should_use_log_forwarder {
        debug!("Writing metrics to stdout for the Datadog log forwarder");
        return Some(Arc::new(log_forwarder::LogForwarder::stdout()));
    }

    let api_key_factory = match &config.api_key {
        ApiKey::Plaintext(key) => ApiKeyFactory::new_from_static_key(key),
        ApiKey::Encrypted(ciphertext) => {
            ApiKeyFactory::new_from_encrypted_key(ciphertext, config.kms_decrypter.clone())
        }
        ApiKey::Missing => return None,
    };

    debug!("Sending metrics to {}", config.api_url);
    Some(Arc::new(api::ApiBackend::new(
        Arc::new(api_key_factory),
        &config.api_url,
        http::get_client(config),
        config.flush_timeout,
    )))
}
