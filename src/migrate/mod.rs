//! Source-to-target migration: sanitizing, validating and repairing
//! generated code, plus the per-file engine around the loop.
pub mod engine;
pub mod repair;
pub mod sanitize;
pub mod validate;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the generated program must look like.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetProfile {
    pub language: String,
    /// Declaration every output must contain.
    pub required_declaration: String,
    /// Outputs must start with this token; otherwise the header is prepended.
    pub header_prefix: String,
    /// Fence tags stripped along with bare fences.
    pub fence_tags: Vec<String>,
    pub forbidden: Vec<ForbiddenSyntax>,
    pub min_lines: usize,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForbiddenSyntax {
    pub pattern: String,
    pub label: String,
}

impl TargetProfile {
    pub fn go(min_lines: usize) -> Self {
        Self {
            language: "Go".to_string(),
            required_declaration: "package main".to_string(),
            header_prefix: "package".to_string(),
            fence_tags: vec!["go".to_string(), "golang".to_string()],
            forbidden: vec![ForbiddenSyntax {
                pattern: "...".to_string(),
                label: "variadic marker".to_string(),
            }],
            min_lines,
            extension: "go".to_string(),
        }
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::go(5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    StructurallyValid,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::StructurallyValid => "structurally_valid",
            AttemptOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptOutcome::Pending),
            "structurally_valid" => Some(AttemptOutcome::StructurallyValid),
            "failed" => Some(AttemptOutcome::Failed),
            _ => None,
        }
    }
}

/// One generation call and what came of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationAttempt {
    pub source_file: String,
    /// Starts at 1.
    pub attempt_number: usize,
    pub raw_output: String,
    pub sanitized_output: String,
    pub diagnostics: Vec<String>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Generating,
    Sanitizing,
    Validating,
    Repairing,
    Succeeded,
    Failed,
}

impl MigrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Succeeded | MigrationState::Failed)
    }
}

/// Final result of migrating one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source_file: String,
    pub state: MigrationState,
    pub output: Option<String>,
    pub output_path: Option<PathBuf>,
    pub attempts: Vec<MigrationAttempt>,
    pub failure: Option<String>,
}

impl MigrationReport {
    pub fn succeeded(&self) -> bool {
        self.state == MigrationState::Succeeded
    }
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{output} is already the output of {claimed_by} in this batch")]
    OutputCollision { output: PathBuf, claimed_by: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}
