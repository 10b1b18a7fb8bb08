use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata row for a built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub module: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub embedder: String,
    pub built_at: DateTime<Utc>,
}

/// One row of a k-NN query, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub ordinal: usize,
    pub text: String,
    pub file: String,
    pub distance: f64,
}

/// Stored counters of the last analysis run for a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub module: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub analyzed_at: DateTime<Utc>,
}
