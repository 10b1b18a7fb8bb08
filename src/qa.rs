//! Retrieval-augmented question answering over one module.
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::llm::prompts::{QA_SYSTEM, qa_prompt};
use crate::llm::{BackendError, GenerateOptions, Generator};
use crate::retriever::{MissingIndex, RetrieveError, Retriever, RetrievedChunk};

#[derive(Error, Debug)]
pub enum QaError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    #[error("generation failed: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    /// Distinct files of the retrieved chunks, sorted.
    pub references: Vec<String>,
    pub context: Vec<RetrievedChunk>,
}

impl QaAnswer {
    /// Answer text followed by the reference list, when there is one.
    pub fn render(&self) -> String {
        if self.references.is_empty() {
            return self.answer.clone();
        }
        format!("{}\n\nReferences:\n{}", self.answer, self.references.join("\n"))
    }
}

pub struct QaService {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl QaService {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// A module without an index is answered with empty context.
    pub async fn answer(
        &self,
        question: &str,
        module: &str,
        top_k: usize,
    ) -> Result<QaAnswer, QaError> {
        let context = self
            .retriever
            .search(question, module, top_k, MissingIndex::Empty)
            .await?;
        info!("Answering over {} chunks from {:?}", context.len(), module);

        let opts = GenerateOptions {
            temperature: Some(0.2),
            system: Some(QA_SYSTEM.to_string()),
            ..GenerateOptions::default()
        };
        let answer = self
            .generator
            .generate(&qa_prompt(question, &context), &opts)
            .await?;

        let references: BTreeSet<String> = context.iter().map(|c| c.file.clone()).collect();
        Ok(QaAnswer {
            answer,
            references: references.into_iter().collect(),
            context,
        })
    }
}
