//! Call graph folding and orphan detection.
use super::extractor::CallEdge;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Caller name → callees in the order the calls were observed.
///
/// Duplicate callees are kept; call counts matter for ranking.
pub type Adjacency = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub adjacency: Adjacency,
    /// Declaration names, de-duplicated, first-seen order.
    pub nodes: Vec<String>,
}

impl Graph {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>, edges: &[CallEdge]) -> Self {
        let mut seen = HashSet::new();
        let nodes = names
            .into_iter()
            .filter(|n| seen.insert(*n))
            .map(str::to_string)
            .collect();
        Self {
            adjacency: build_adjacency(edges),
            nodes,
        }
    }

    pub fn orphans(&self) -> Vec<String> {
        find_orphans(self.nodes.iter().map(String::as_str), &self.adjacency)
    }

    /// Total calls, duplicates included.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }
}

pub fn build_adjacency(edges: &[CallEdge]) -> Adjacency {
    let mut adjacency = Adjacency::new();
    for edge in edges {
        adjacency
            .entry(edge.caller.clone())
            .or_default()
            .push(edge.callee.clone());
    }
    adjacency
}

/// Names that never appear as a callee in any adjacency list.
///
/// Outgoing edges do not matter. A function that calls itself appears as
/// its own callee and is therefore not an orphan; a recursive pair is
/// covered the same way. Output is de-duplicated in input order.
pub fn find_orphans<'a>(
    names: impl IntoIterator<Item = &'a str>,
    adjacency: &Adjacency,
) -> Vec<String> {
    let called: HashSet<&str> = adjacency.values().flatten().map(String::as_str).collect();
    let mut emitted = HashSet::new();
    names
        .into_iter()
        .filter(|n| !called.contains(n) && emitted.insert(*n))
        .map(str::to_string)
        .collect()
}
