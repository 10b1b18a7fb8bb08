use super::extractor::{Declaration, DeclarationKind};
use serde::{Deserialize, Serialize};

/// A retrievable summary of one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ordinal within the module's chunk list.
    pub id: usize,
    pub text: String,
    pub file: String,
    pub module: String,
}

pub fn chunk_text(decl: &Declaration) -> String {
    let label = match decl.kind {
        DeclarationKind::Function => "Function",
        DeclarationKind::Class => "Class",
    };
    format!("{} {} in {} at line {}", label, decl.name, decl.file, decl.line)
}

/// One chunk per declaration, ids assigned in input order.
pub fn build_chunks(module: &str, declarations: &[Declaration]) -> Vec<Chunk> {
    declarations
        .iter()
        .enumerate()
        .map(|(id, decl)| Chunk {
            id,
            text: chunk_text(decl),
            file: decl.file.clone(),
            module: module.to_string(),
        })
        .collect()
}

/// Whether two chunk lists would embed to the same index.
pub fn same_texts(a: &[Chunk], b: &[Chunk]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.text == y.text && x.file == y.file)
}
