/// Configuration module for codeatlas.
///
/// Handles loading, validating, and providing default configuration values
/// for extraction, indexing, generation providers, migration and verification.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indexer::extractor::{CallAttribution, ExtractionPolicy};

// ── Default value functions ──────────────────────────────────────────

fn default_source_root() -> String {
    "./".to_string()
}

fn default_db_path() -> String {
    "./codeatlas.db".to_string()
}

fn default_output_dir() -> String {
    "./migrations".to_string()
}

fn default_search_top_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_attribution() -> String {
    "outermost".to_string()
}

fn default_embed_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "groq".to_string(),
            kind: "openai".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            temperature: Some(0.2),
            timeout_secs: default_provider_timeout(),
        },
        ProviderConfig {
            name: "openai".to_string(),
            kind: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: Some(0.2),
            timeout_secs: default_provider_timeout(),
        },
        ProviderConfig {
            name: "ollama".to_string(),
            kind: "ollama".to_string(),
            base_url: default_ollama_url(),
            model: "llama3".to_string(),
            api_key_env: None,
            temperature: None,
            timeout_secs: default_provider_timeout(),
        },
    ]
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_max_attempts() -> usize {
    3
}

fn default_min_lines() -> usize {
    5
}

fn default_generation_timeout() -> u64 {
    400
}

fn default_concurrency() -> usize {
    4
}

fn default_compile_command() -> Vec<String> {
    vec![
        "go".to_string(),
        "build".to_string(),
        "-o".to_string(),
        "{out}".to_string(),
        "{file}".to_string(),
    ]
}

fn default_source_command() -> Vec<String> {
    vec!["python3".to_string(), "{file}".to_string()]
}

fn default_target_command() -> Vec<String> {
    vec!["go".to_string(), "run".to_string(), "{file}".to_string()]
}

fn default_verify_timeout() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root of the analysed source tree. Modules are subdirectories of it.
    #[serde(default = "default_source_root")]
    pub source_root: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory receiving migrated files.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Only embed the first N chunks of a module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunks: Option<usize>,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation providers, tried in order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractionConfig {
    /// `outermost` or `innermost`
    #[serde(default = "default_attribution")]
    pub call_attribution: String,

    #[serde(default = "default_true")]
    pub record_module_scope_calls: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai` or `mock`
    #[serde(default = "default_embed_provider")]
    pub provider: String,

    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_embed_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub name: String,

    /// `ollama` or `openai` (any OpenAI-compatible endpoint)
    pub kind: String,

    pub base_url: String,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MigrationConfig {
    /// Upper bound on generation calls per file (initial + repairs).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_min_lines")]
    pub min_lines: usize,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Run the target toolchain on structurally valid output.
    #[serde(default)]
    pub compile_check: bool,

    #[serde(default = "default_compile_command")]
    pub compile_command: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerificationConfig {
    #[serde(default = "default_source_command")]
    pub source_command: Vec<String>,

    #[serde(default = "default_target_command")]
    pub target_command: Vec<String>,

    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            db_path: default_db_path(),
            output_dir: default_output_dir(),
            search_top_k: default_search_top_k(),
            max_chunks: None,
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            providers: default_providers(),
            migration: MigrationConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            call_attribution: default_attribution(),
            record_module_scope_calls: default_true(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            base_url: default_ollama_url(),
            model: default_embed_model(),
            api_key_env: None,
            timeout_secs: default_embed_timeout(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_lines: default_min_lines(),
            generation_timeout_secs: default_generation_timeout(),
            concurrency: default_concurrency(),
            compile_check: false,
            compile_command: default_compile_command(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            source_command: default_source_command(),
            target_command: default_target_command(),
            timeout_secs: default_verify_timeout(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.migration.max_attempts > 0,
            "migration.max_attempts must be positive"
        );
        anyhow::ensure!(
            self.migration.concurrency > 0,
            "migration.concurrency must be positive"
        );
        anyhow::ensure!(
            self.migration.generation_timeout_secs > 0,
            "migration.generation_timeout_secs must be positive"
        );
        let chain_secs: u64 = self.providers.iter().map(|p| p.timeout_secs).sum();
        anyhow::ensure!(
            self.migration.generation_timeout_secs >= chain_secs,
            "migration.generation_timeout_secs ({}) must cover every provider's timeout in turn ({})",
            self.migration.generation_timeout_secs,
            chain_secs
        );
        anyhow::ensure!(
            self.verification.timeout_secs > 0,
            "verification.timeout_secs must be positive"
        );
        anyhow::ensure!(
            !self.verification.source_command.is_empty()
                && !self.verification.target_command.is_empty(),
            "verification commands must not be empty"
        );
        anyhow::ensure!(
            !self.migration.compile_check || !self.migration.compile_command.is_empty(),
            "migration.compile_command must not be empty when compile_check is on"
        );
        anyhow::ensure!(
            matches!(
                self.extraction.call_attribution.as_str(),
                "outermost" | "innermost"
            ),
            "extraction.call_attribution must be `outermost` or `innermost`"
        );
        for p in &self.providers {
            anyhow::ensure!(
                matches!(p.kind.as_str(), "ollama" | "openai"),
                "provider {} has unknown kind {}",
                p.name,
                p.kind
            );
        }
        Ok(())
    }

    /// Extraction policy derived from the `extraction` section.
    #[must_use]
    pub fn extraction_policy(&self) -> ExtractionPolicy {
        let attribution = match self.extraction.call_attribution.as_str() {
            "innermost" => CallAttribution::Innermost,
            _ => CallAttribution::Outermost,
        };
        ExtractionPolicy {
            attribution,
            record_module_scope_calls: self.extraction.record_module_scope_calls,
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }
}

/// Read an API key from the environment variable named by `var`.
///
/// Returns `None` when no variable is configured or it is unset/empty.
pub fn api_key_from_env(var: Option<&str>) -> Option<String> {
    let var = var?;
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.migration.max_attempts, 3);
        assert_eq!(config.migration.min_lines, 5);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.providers[0].name, "groq");
        assert_eq!(config.providers[2].kind, "ollama");
        assert!(config.extraction.record_module_scope_calls);
        assert!(config.max_chunks.is_none());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"search_top_k": 8, "db_path": "./test.db", "migration": {"max_attempts": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.search_top_k, 8);
        assert_eq!(config.db_path, "./test.db");
        assert_eq!(config.migration.max_attempts, 5);
        // Other fields should have defaults
        assert_eq!(config.migration.min_lines, 5);
        assert_eq!(config.verification.timeout_secs, 60);
        assert_eq!(config.providers.len(), 3);
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.migration.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_generation_timeout_covers_chain() {
        let mut config = Config::default();
        let chain: u64 = config.providers.iter().map(|p| p.timeout_secs).sum();
        assert!(config.migration.generation_timeout_secs >= chain);

        config.migration.generation_timeout_secs = chain - 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("generation_timeout_secs"));

        config.providers.pop();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_attribution() {
        let mut config = Config::default();
        config.extraction.call_attribution = "nearest".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_provider_kind() {
        let mut config = Config::default();
        config.providers[0].kind = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extraction_policy() {
        let mut config = Config::default();
        assert_eq!(
            config.extraction_policy().attribution,
            CallAttribution::Outermost
        );
        config.extraction.call_attribution = "innermost".to_string();
        config.extraction.record_module_scope_calls = false;
        let policy = config.extraction_policy();
        assert_eq!(policy.attribution, CallAttribution::Innermost);
        assert!(!policy.record_module_scope_calls);
    }

    #[test]
    fn test_load_missing_custom_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.search_top_k, 5);
        assert!(!path.exists(), "templates are only written for config.json");
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.migration.max_attempts, 3);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.providers.len(), config.providers.len());
        assert_eq!(parsed.verification.target_command, config.verification.target_command);
    }
}
