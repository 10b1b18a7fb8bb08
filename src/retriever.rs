//! Query-time nearest-neighbour lookup over a module's stored index.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::Db;
use crate::embedder::{Embedder, EmbedderError};

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("no index built for module {0:?}")]
    IndexNotFound(String),

    #[error("query dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// What to do when the module has no index yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIndex {
    /// Answer with no context.
    Empty,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub ordinal: usize,
    pub text: String,
    pub file: String,
    pub distance: f64,
}

pub struct Retriever {
    db: Arc<Mutex<Db>>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(db: Arc<Mutex<Db>>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// The `min(k, n)` chunks of `module` closest to `query`, nearest first.
    pub async fn search(
        &self,
        query: &str,
        module: &str,
        k: usize,
        missing: MissingIndex,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        let info = self.db.lock().await.index_info(module)?;
        let Some(info) = info else {
            return match missing {
                MissingIndex::Empty => Ok(Vec::new()),
                MissingIndex::Error => Err(RetrieveError::IndexNotFound(module.to_string())),
            };
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        if vector.len() != info.dimension {
            return Err(RetrieveError::DimensionMismatch {
                expected: info.dimension,
                found: vector.len(),
            });
        }

        let hits = self.db.lock().await.search(module, &vector, k)?;
        debug!("Retrieved {} chunks from {:?}", hits.len(), module);
        Ok(hits
            .into_iter()
            .map(|h| RetrievedChunk {
                ordinal: h.ordinal,
                text: h.text,
                file: h.file,
                distance: h.distance,
            })
            .collect())
    }
}
