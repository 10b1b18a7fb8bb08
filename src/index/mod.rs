//! Per-module vector index: building, validation and atomic replacement.
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::Db;
use crate::db::models::IndexInfo;
use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::chunker::{self, Chunk};
use crate::sync::KeyedGate;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("no chunks to index for module {0:?}")]
    Empty(String),

    #[error("dimension mismatch at ordinal {ordinal}: expected {expected}, found {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        ordinal: usize,
    },

    #[error("{chunks} chunks but {vectors} vectors")]
    CountMismatch { chunks: usize, vectors: usize },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Chunks and their vectors for one module; `vectors[i]` embeds `chunks[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    module: String,
    dimension: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Checks the ordinal pairing and that every vector shares the first one's dimension.
    pub fn new(
        module: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        let Some(first) = vectors.first() else {
            return Err(IndexError::Empty(module.to_string()));
        };
        let dimension = first.len();
        if let Some((ordinal, v)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                found: v.len(),
                ordinal,
            });
        }
        Ok(Self {
            module: module.to_string(),
            dimension,
            chunks,
            vectors,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built(IndexInfo),
    /// Stored index already matches these chunks and embedder.
    Unchanged(IndexInfo),
}

impl BuildOutcome {
    pub fn info(&self) -> &IndexInfo {
        match self {
            BuildOutcome::Built(info) | BuildOutcome::Unchanged(info) => info,
        }
    }
}

/// Embeds chunk lists and swaps them into the store, one module at a time.
pub struct IndexBuilder {
    db: Arc<Mutex<Db>>,
    embedder: Arc<dyn Embedder>,
    gate: Arc<KeyedGate>,
    max_chunks: Option<usize>,
}

impl IndexBuilder {
    pub fn new(db: Arc<Mutex<Db>>, embedder: Arc<dyn Embedder>, gate: Arc<KeyedGate>) -> Self {
        Self {
            db,
            embedder,
            gate,
            max_chunks: None,
        }
    }

    /// Only the first `max` chunks are embedded.
    pub fn with_max_chunks(mut self, max: Option<usize>) -> Self {
        self.max_chunks = max;
        self
    }

    /// Build and store the index for `module`.
    ///
    /// Any embedding failure leaves the previously stored index untouched.
    pub async fn build(
        &self,
        module: &str,
        mut chunks: Vec<Chunk>,
        force: bool,
    ) -> Result<BuildOutcome, IndexError> {
        let _guard = self.gate.acquire(module).await;

        if let Some(max) = self.max_chunks {
            chunks.truncate(max);
        }
        if chunks.is_empty() {
            return Err(IndexError::Empty(module.to_string()));
        }

        if !force {
            let db = self.db.lock().await;
            if let Some(info) = db.index_info(module)? {
                if info.embedder == self.embedder.name()
                    && chunker::same_texts(&db.load_chunks(module)?, &chunks)
                {
                    debug!("Index for {:?} is up to date", module);
                    return Ok(BuildOutcome::Unchanged(info));
                }
            }
        }

        info!(
            "Embedding {} chunks for module {:?} with {}",
            chunks.len(),
            module,
            self.embedder.name()
        );
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let index = VectorIndex::new(module, chunks, vectors)?;

        let info = self
            .db
            .lock()
            .await
            .replace_index(&index, self.embedder.name())?;
        info!(
            "Stored index for {:?}: {} chunks, dimension {}",
            module, info.chunk_count, info.dimension
        );
        Ok(BuildOutcome::Built(info))
    }
}
