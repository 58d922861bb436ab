// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::error::DecryptError;

/// Decrypts a KMS-encrypted API key.
///
/// The key management call is owned by the application (or its AWS SDK
/// client); the library only needs the plaintext back.
#[async_trait]
pub trait KeyDecrypter: Send + Sync {
    async fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError>;
}

#[derive(Clone)]
pub enum ApiKeyFactory {
    Static(String),
    Encrypted {
        ciphertext: String,
        decrypter: Option<Arc<dyn KeyDecrypter>>,
        api_key: Arc<OnceCell<Option<String>>>,
    },
}

impl ApiKeyFactory {
    pub fn new_from_static_key(api_key: &str) -> Self {
        Self::Static(api_key.to_string())
    }

    pub fn new_from_encrypted_key(
        ciphertext: &str,
        decrypter: Option<Arc<dyn KeyDecrypter>>,
    ) -> Self {
        Self::Encrypted {
            ciphertext: ciphertext.to_string(),
            decrypter,
            api_key: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the plaintext key, decrypting it on first use.
    ///
    /// The outcome of the first decryption is cached, failures included.
    pub async fn get_api_key(&self) -> Option<&str> {
        match self {
            Self::Static(api_key) => Some(api_key),
            Self::Encrypted {
                ciphertext,
                decrypter,
                api_key,
            } => api_key
                .get_or_init(|| async move {
                    let Some(decrypter) = decrypter else {
                        error!("DD_KMS_API_KEY is set but no key decrypter was configured");
                        return None;
                    };
                    match decrypter.decrypt(ciphertext).await {
                        Ok(plaintext) => {
                            debug!("Decrypted KMS API key");
                            Some(plaintext)
                        }
                        Err(e) => {
                            error!("Failed to decrypt KMS API key: {e}");
                            None
                        }
                    }
                })
                .await
                .as_deref(),
        }
    }
}

impl Debug for ApiKeyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKeyFactory")
    }
}
