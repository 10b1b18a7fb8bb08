/// OpenAI-compatible embedding backend (`/v1/embeddings`).
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderError, http_client};

const PROVIDER: &str = "openai";
const BATCH_SIZE: usize = 64;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    identity: String,
    api_key: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, EmbedderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            identity: format!("{PROVIDER}:{model}"),
            api_key: api_key.to_string(),
        })
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| EmbedderError::Request {
                provider: PROVIDER.to_string(),
                cause: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedderError::Request {
                provider: PROVIDER.to_string(),
                cause: format!("{status}: {body}"),
            });
        }

        let mut body: EmbedResponse =
            resp.json().await.map_err(|e| EmbedderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                cause: e.to_string(),
            })?;

        if body.data.len() != texts.len() {
            return Err(EmbedderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                cause: format!("expected {} embeddings, got {}", texts.len(), body.data.len()),
            });
        }
        // The API does not promise response order.
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
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
