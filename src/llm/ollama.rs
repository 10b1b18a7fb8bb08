/// Ollama chat backend (`/api/chat`, non-streaming).
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BackendError, GenerateOptions, Generator, check_status, http_client};
use crate::config::ProviderConfig;

pub struct OllamaGenerator {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ModelOptions>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaGenerator {
    pub fn new(cfg: &ProviderConfig, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            name: cfg.name.clone(),
            client: http_client(&cfg.name, timeout)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = opts.system.as_deref() {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: prompt,
        });

        let temperature = opts.temperature.or(self.temperature);
        let options = (temperature.is_some() || opts.max_tokens.is_some()).then_some(ModelOptions {
            temperature,
            num_predict: opts.max_tokens,
        });
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options,
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| BackendError::new(&self.name, e.to_string()))?;
        let body: ChatResponse = check_status(&self.name, resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::new(&self.name, format!("malformed response: {e}")))?;
        Ok(body.message.content)
    }
}
