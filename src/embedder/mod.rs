/// Embedder trait and shared types for text embedding.
///
/// Backends are remote services, so the trait is async and object safe;
/// the index builder and retriever hold it as `Arc<dyn Embedder>`.
pub mod mock;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EmbeddingConfig, api_key_from_env};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request to {provider} failed: {cause}")]
    Request { provider: String, cause: String },

    #[error("malformed embedding response from {provider}: {cause}")]
    InvalidResponse { provider: String, cause: String },

    #[error("embedding provider {0} unavailable: {1}")]
    Unavailable(String, String),
}

/// Trait for text embedding implementations.
///
/// The same text is expected to embed to the same vector within one
/// index build; nothing is assumed across backend versions.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider and model identity recorded with built indices.
    ///
    /// Vectors from different identities are never mixed; a stored index is
    /// reused only when the identity matches exactly.
    fn name(&self) -> &str;

    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Build the embedder described by the `embedding` config section.
pub fn from_config(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    match cfg.provider.as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaEmbedder::new(
            &cfg.base_url,
            &cfg.model,
            timeout,
        )?)),
        "openai" => {
            let key = api_key_from_env(cfg.api_key_env.as_deref()).ok_or_else(|| {
                EmbedderError::Unavailable("openai".to_string(), "API key not set".to_string())
            })?;
            Ok(Arc::new(openai::OpenAiEmbedder::new(
                &cfg.base_url,
                &cfg.model,
                &key,
                timeout,
            )?))
        }
        "mock" => Ok(Arc::new(mock::MockEmbedder::default())),
        other => Err(EmbedderError::Unavailable(
            other.to_string(),
            "unknown embedding provider".to_string(),
        )),
    }
}

/// Shared HTTP client with the provider timeout applied.
pub(crate) fn http_client(provider: &str, timeout: Duration) -> Result<reqwest::Client, EmbedderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbedderError::Unavailable(provider.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_mock() {
        let cfg = EmbeddingConfig {
            provider: "mock".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&cfg).unwrap();
        assert_eq!(embedder.name(), "mock:384");
    }

    #[test]
    fn test_from_config_unknown_provider() {
        let cfg = EmbeddingConfig {
            provider: "word2vec-on-a-floppy".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            from_config(&cfg),
            Err(EmbedderError::Unavailable(..))
        ));
    }

    #[test]
    fn test_from_config_openai_requires_key() {
        let cfg = EmbeddingConfig {
            provider: "openai".to_string(),
            api_key_env: Some("CODEATLAS_TEST_UNSET_EMBED_KEY".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(from_config(&cfg).is_err());
    }
}
