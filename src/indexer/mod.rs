//! Static extraction: declarations, call edges, graph and chunks.
pub mod chunker;
pub mod core;
pub mod extractor;
pub mod graph;
pub mod languages;
