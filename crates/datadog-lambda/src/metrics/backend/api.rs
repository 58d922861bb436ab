// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::api_key::ApiKeyFactory;
use crate::error::DeliveryError;
use crate::metrics::backend::MetricsBackend;
use crate::metrics::batch::Batch;

const DISTRIBUTION_POINTS_PATH: &str = "/distribution_points";

/// Ships batches to the Datadog v1 distribution intake.
pub struct ApiBackend {
    api_key_factory: Arc<ApiKeyFactory>,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ApiBackend {
    /// `api_url` is the versioned prefix, e.g. `https://api.datadoghq.com/api/v1`.
    pub fn new(
        api_key_factory: Arc<ApiKeyFactory>,
        api_url: &str,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key_factory,
            url: format!("{}{DISTRIBUTION_POINTS_PATH}", api_url.trim_end_matches('/')),
            client,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MetricsBackend for ApiBackend {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let Some(api_key) = self.api_key_factory.get_api_key().await else {
            return Err(DeliveryError::MissingApiKey);
        };

        let body = batch.to_payload()?;
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header("DD-API-KEY", api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(
                "Shipped {} samples in {} ms, status {status}",
                batch.len(),
                start.elapsed().as_millis()
            );
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(DeliveryError::Status { status, body })
    }
}
