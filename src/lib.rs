//! # codeatlas — code graph, retrieval QA and validated migration
//!
//! Extracts a declaration and call graph from a source tree, indexes
//! per-module declaration summaries in a local vector store for question
//! answering, and translates source files to Go through a bounded
//! generate/validate/repair loop with optional equivalence checks.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration with per-field defaults
//! - **[`indexer`]** — Tree-sitter extraction, call graph, orphans, chunks
//! - **[`embedder`]** — Text embedding (Ollama, OpenAI-compatible, mock)
//! - **[`index`]** — Per-module vector index building
//! - **[`db`]** — SQLite + sqlite-vec persistence and k-NN search
//! - **[`retriever`]** / **[`qa`]** — Retrieval and question answering
//! - **[`llm`]** — Generative backends, fallback chain, prompts
//! - **[`migrate`]** — Sanitizer, validator, repair loop, migration engine
//! - **[`exec`]** / **[`verify`]** — Subprocess execution and equivalence checks
//! - **[`app`]** — Shared context behind the CLI commands

pub mod app;
pub mod config;
pub mod db;
pub mod embedder;
pub mod exec;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod migrate;
pub mod qa;
pub mod retriever;
pub mod sync;
pub mod verify;
