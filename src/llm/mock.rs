/// Scripted generator for tests and offline runs.
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, GenerateOptions, Generator};

/// Replays a script of responses in order; the last entry repeats once
/// the script runs out.
pub struct MockGenerator {
    name: String,
    script: Vec<Result<String, String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn respond(mut self, text: &str) -> Self {
        self.script.push(Ok(text.to_string()));
        self
    }

    #[must_use]
    pub fn fail(mut self, cause: &str) -> Self {
        self.script.push(Err(cause.to_string()));
        self
    }

    /// Sleep before answering, to exercise timeouts and cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.prompts.lock() {
            Ok(mut p) => p.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let entry = self
            .script
            .get(n)
            .or_else(|| self.script.last())
            .ok_or_else(|| BackendError::new(&self.name, "no scripted response"))?;
        entry
            .clone()
            .map_err(|cause| BackendError::new(&self.name, cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_then_repeats_last() {
        let g = MockGenerator::new("m").respond("one").fail("boom");
        let opts = GenerateOptions::default();
        assert_eq!(g.generate("a", &opts).await.unwrap(), "one");
        assert_eq!(g.generate("b", &opts).await.unwrap_err().cause, "boom");
        assert_eq!(g.generate("c", &opts).await.unwrap_err().cause, "boom");
        assert_eq!(g.calls(), 3);
        assert_eq!(g.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_script_errors() {
        let g = MockGenerator::new("m");
        let err = g.generate("a", &GenerateOptions::default()).await.unwrap_err();
        assert_eq!(err.provider, "m");
    }
}
