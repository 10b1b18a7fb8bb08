use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{BackendError, GenerateOptions, Generator};

/// Tries each provider once, in order, until one answers.
///
/// Callers see a single `Generator`; the last provider's error is returned
/// when every provider fails.
pub struct FallbackChain {
    providers: Vec<Arc<dyn Generator>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn Generator>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Generator for FallbackChain {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let mut last_err = BackendError::new("fallback", "no providers configured");
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.generate(prompt, opts).await {
                Ok(text) => {
                    debug!("Generated with {}", provider.name());
                    return Ok(text);
                }
                Err(e) => {
                    if let Some(next) = self.providers.get(i + 1) {
                        warn!("Provider {} failed ({}), falling back to {}", e.provider, e.cause, next.name());
                    } else {
                        warn!("Provider {} failed ({}), no providers left", e.provider, e.cause);
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
