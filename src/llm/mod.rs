//! Generative backends and the ordered fallback chain over them.
pub mod fallback;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ProviderConfig, api_key_from_env};
pub use fallback::FallbackChain;

/// A failed generation call, tagged with the provider that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider}: {cause}")]
pub struct BackendError {
    pub provider: String,
    pub cause: String,
}

impl BackendError {
    pub fn new(provider: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// System message sent ahead of the prompt.
    pub system: Option<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, opts: &GenerateOptions)
    -> Result<String, BackendError>;
}

/// Build the fallback chain from the configured provider list, in order.
///
/// Providers whose API key variable is unset are skipped.
pub fn build_chain(providers: &[ProviderConfig]) -> FallbackChain {
    let mut chain: Vec<Arc<dyn Generator>> = Vec::new();
    for p in providers {
        let key = api_key_from_env(p.api_key_env.as_deref());
        if p.api_key_env.is_some() && key.is_none() {
            warn!(
                "Skipping provider {}: {} is not set",
                p.name,
                p.api_key_env.as_deref().unwrap_or_default()
            );
            continue;
        }
        let timeout = Duration::from_secs(p.timeout_secs);
        let built: Result<Arc<dyn Generator>, BackendError> = match p.kind.as_str() {
            "ollama" => ollama::OllamaGenerator::new(p, timeout)
                .map(|g| Arc::new(g) as Arc<dyn Generator>),
            "openai" => openai::OpenAiGenerator::new(p, key, timeout)
                .map(|g| Arc::new(g) as Arc<dyn Generator>),
            other => Err(BackendError::new(&p.name, format!("unknown kind {other}"))),
        };
        match built {
            Ok(g) => chain.push(g),
            Err(e) => warn!("Skipping provider {}: {}", p.name, e.cause),
        }
    }
    info!(
        "Generation chain: [{}]",
        chain.iter().map(|g| g.name()).collect::<Vec<_>>().join(", ")
    );
    FallbackChain::new(chain)
}

pub(crate) fn http_client(provider: &str, timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::new(provider, e.to_string()))
}

/// Turn a non-success HTTP response into a `BackendError`.
pub(crate) async fn check_status(
    provider: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::new(provider, format!("{status}: {body}")))
}
