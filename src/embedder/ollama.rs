/// Ollama embedding backend (`/api/embed`).
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderError, http_client};

const PROVIDER: &str = "ollama";
const BATCH_SIZE: usize = 32;

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    identity: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, EmbedderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            identity: format!("{PROVIDER}:{model}"),
        })
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| request_error(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(request_error(format!("{status}: {body}")));
        }

        let body: EmbedResponse = resp.json().await.map_err(|e| EmbedderError::InvalidResponse {
            provider: PROVIDER.to_string(),
            cause: e.to_string(),
        })?;

        if body.embeddings.len() != texts.len() {
            return Err(EmbedderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                cause: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    body.embeddings.len()
                ),
            });
        }
        Ok(body.embeddings)
    }
}

fn request_error(cause: String) -> EmbedderError {
    EmbedderError::Request {
        provider: PROVIDER.to_string(),
        cause,
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.identity
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut out = self.request(&[text]).await?;
        out.pop().ok_or_else(|| EmbedderError::InvalidResponse {
            provider: PROVIDER.to_string(),
            cause: "no embedding returned".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            all.extend(self.request(batch).await?);
        }
        Ok(all)
    }
}
