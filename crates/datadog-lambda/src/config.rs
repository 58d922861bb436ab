// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::api_key::KeyDecrypter;

/// Plaintext Datadog API key, used to ship metrics.
pub const DD_API_KEY_ENV_VAR: &str = "DD_API_KEY";
/// API key encrypted with AWS KMS, decrypted before first use.
pub const DD_KMS_API_KEY_ENV_VAR: &str = "DD_KMS_API_KEY";
/// Datadog site, e.g. `datadoghq.eu`.
pub const DD_SITE_ENV_VAR: &str = "DD_SITE";
/// Log level; `debug` turns on verbose logging.
pub const DD_LOG_LEVEL_ENV_VAR: &str = "DD_LOG_LEVEL";
/// `true` writes metrics as log lines for the Datadog forwarder.
pub const DD_FLUSH_TO_LOG_ENV_VAR: &str = "DD_FLUSH_TO_LOG";
/// Overrides the whole intake prefix (scheme and host).
pub const DD_DD_URL_ENV_VAR: &str = "DD_DD_URL";

pub const DEFAULT_SITE: &str = "datadoghq.com";
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Explicit configuration for the wrapper. Every field is optional; the
/// environment fills the gaps.
#[derive(Clone, Default)]
pub struct Config {
    /// Datadog API key
    pub api_key: Option<String>,
    /// Datadog API key encrypted with KMS
    pub kms_api_key: Option<String>,
    /// Decrypts `kms_api_key` (or `DD_KMS_API_KEY`)
    pub kms_decrypter: Option<Arc<dyn KeyDecrypter>>,
    /// Datadog site to send metrics to
    pub site: Option<String>,
    /// Intake prefix override, e.g. `http://127.0.0.1:8080`
    pub dd_url: Option<String>,
    /// How often metrics are flushed during an invocation. `Duration::ZERO`
    /// only flushes when the invocation ends.
    pub batch_interval: Option<Duration>,
    /// Retry failed API deliveries. Trades handler latency for durability.
    pub should_retry_on_failure: bool,
    /// Write metrics as log lines instead of calling the API
    pub should_use_log_forwarder: bool,
    /// Turn on debug logging
    pub debug_logging: bool,
    /// Upper bound on a single flush, retries included
    pub flush_timeout: Option<Duration>,
    /// HTTPS proxy for API calls
    pub https_proxy: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("kms_api_key", &self.kms_api_key.as_ref().map(|_| "<redacted>"))
            .field("kms_decrypter", &self.kms_decrypter.is_some())
            .field("site", &self.site)
            .field("dd_url", &self.dd_url)
            .field("batch_interval", &self.batch_interval)
            .field("should_retry_on_failure", &self.should_retry_on_failure)
            .field("should_use_log_forwarder", &self.should_use_log_forwarder)
            .field("debug_logging", &self.debug_logging)
            .field("flush_timeout", &self.flush_timeout)
            .field("https_proxy", &self.https_proxy)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum ApiKey {
    Plaintext(String),
    Encrypted(String),
    Missing,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext(_) => write!(f, "Plaintext(<redacted>)"),
            Self::Encrypted(_) => write!(f, "Encrypted(<redacted>)"),
            Self::Missing => write!(f, "Missing"),
        }
    }
}

/// Configuration after merging explicit values with the environment.
/// Immutable for the lifetime of a wrapped handler.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub api_key: ApiKey,
    pub kms_decrypter: Option<Arc<dyn KeyDecrypter>>,
    pub site: String,
    /// e.g. `https://api.datadoghq.com/api/v1`
    pub api_url: String,
    pub batch_interval: Duration,
    pub should_retry_on_failure: bool,
    pub should_use_log_forwarder: bool,
    pub debug_logging: bool,
    pub flush_timeout: Duration,
    pub https_proxy: Option<String>,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("api_key", &self.api_key)
            .field("kms_decrypter", &self.kms_decrypter.is_some())
            .field("site", &self.site)
            .field("api_url", &self.api_url)
            .field("batch_interval", &self.batch_interval)
            .field("should_retry_on_failure", &self.should_retry_on_failure)
            .field("should_use_log_forwarder", &self.should_use_log_forwarder)
            .field("debug_logging", &self.debug_logging)
            .field("flush_timeout", &self.flush_timeout)
            .field("https_proxy", &self.https_proxy)
            .finish()
    }
}

impl ResolvedConfig {
    /// Log level handed to the subscriber installed by [`crate::logger::init`]
    pub fn log_level(&self) -> &'static str {
        if self.debug_logging {
            "debug"
        } else {
            "info"
        }
    }
}

impl Config {
    /// Merges this configuration with the process environment.
    ///
    /// Never fails: a missing API key is logged and leaves the wrapper in a
    /// degraded mode where API deliveries are skipped.
    pub fn resolve(self) -> ResolvedConfig {
        let api_key = resolve_api_key(
            self.api_key.as_deref(),
            self.kms_api_key.as_deref(),
            read_env(DD_API_KEY_ENV_VAR).as_deref(),
            read_env(DD_KMS_API_KEY_ENV_VAR).as_deref(),
        );
        if api_key == ApiKey::Missing {
            error!("couldn't read DD_API_KEY or DD_KMS_API_KEY from environment");
        }

        let site = non_empty(self.site)
            .or_else(|| read_env(DD_SITE_ENV_VAR))
            .map(|site| normalize_site(&site))
            .filter(|site| !site.is_empty())
            .unwrap_or_else(|| DEFAULT_SITE.to_string());

        let api_url = match non_empty(self.dd_url).or_else(|| read_env(DD_DD_URL_ENV_VAR)) {
            Some(dd_url) => format!("{}/api/v1", dd_url.trim().trim_end_matches('/')),
            None => api_url_for_site(&site),
        };

        let should_use_log_forwarder = self.should_use_log_forwarder
            || read_env(DD_FLUSH_TO_LOG_ENV_VAR)
                .is_some_and(|val| val.trim().eq_ignore_ascii_case("true"));

        let debug_logging = self.debug_logging
            || read_env(DD_LOG_LEVEL_ENV_VAR)
                .is_some_and(|val| val.trim().eq_ignore_ascii_case("debug"));

        let https_proxy = non_empty(self.https_proxy)
            .or_else(|| read_env("DD_PROXY_HTTPS"))
            .or_else(|| read_env("HTTPS_PROXY"));

        ResolvedConfig {
            api_key,
            kms_decrypter: self.kms_decrypter,
            site,
            api_url,
            batch_interval: self.batch_interval.unwrap_or(DEFAULT_BATCH_INTERVAL),
            should_retry_on_failure: self.should_retry_on_failure,
            should_use_log_forwarder,
            debug_logging,
            flush_timeout: self
                .flush_timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(DEFAULT_FLUSH_TIMEOUT),
            https_proxy,
        }
    }
}

/// Precedence: explicit plaintext, explicit encrypted, environment
/// plaintext, environment encrypted.
fn resolve_api_key(
    explicit: Option<&str>,
    explicit_encrypted: Option<&str>,
    env: Option<&str>,
    env_encrypted: Option<&str>,
) -> ApiKey {
    fn usable(key: Option<&str>) -> Option<&str> {
        key.map(str::trim).filter(|key| !key.is_empty())
    }

    if let Some(key) = usable(explicit) {
        return ApiKey::Plaintext(key.to_string());
    }
    if let Some(key) = usable(explicit_encrypted) {
        return ApiKey::Encrypted(key.to_string());
    }
    if let Some(key) = usable(env) {
        return ApiKey::Plaintext(key.to_string());
    }
    if let Some(key) = usable(env_encrypted) {
        return ApiKey::Encrypted(key.to_string());
    }
    ApiKey::Missing
}

fn normalize_site(site: &str) -> String {
    let site = site.trim();
    let site = site
        .strip_prefix("https://")
        .or_else(|| site.strip_prefix("http://"))
        .unwrap_or(site);
    site.trim_end_matches('/').to_string()
}

pub fn api_url_for_site(site: &str) -> String {
    format!("https://api.{site}/api/v1")
}

fn read_env(name: &str) -> Option<String> {
    non_empty(env::var(name).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|val| !val.trim().is_empty())
}
