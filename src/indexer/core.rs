use crate::indexer::chunker::{self, Chunk};
use crate::indexer::extractor::{
    self, CallEdge, Declaration, DeclarationKind, ExtractionPolicy, ParseError,
};
use crate::indexer::graph::Graph;
use crate::indexer::languages::LanguageConfig;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything extracted from one module's subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleAnalysis {
    pub module: String,
    pub declarations: Vec<Declaration>,
    pub calls: Vec<CallEdge>,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

impl ModuleAnalysis {
    pub fn functions(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations
            .iter()
            .filter(|d| d.kind == DeclarationKind::Function)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations
            .iter()
            .filter(|d| d.kind == DeclarationKind::Class)
    }

    pub fn graph(&self) -> Graph {
        Graph::new(
            self.declarations.iter().map(|d| d.name.as_str()),
            &self.calls,
        )
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        chunker::build_chunks(&self.module, &self.declarations)
    }
}

/// Directory walked for `module` under `root`; empty module means the root.
pub fn module_dir(root: &Path, module: &str) -> PathBuf {
    if module.is_empty() {
        root.to_path_buf()
    } else {
        root.join(module)
    }
}

fn is_source_extension(ext: &str) -> bool {
    LanguageConfig::get_by_extension(ext).is_some()
}

/// Walks the module subtree and folds per-file extractions.
///
/// Files that fail to read or parse are skipped and counted.
pub fn analyze_module(
    root: &Path,
    module: &str,
    policy: &ExtractionPolicy,
) -> std::io::Result<ModuleAnalysis> {
    let dir = module_dir(root, module);
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("module directory not found: {}", dir.display()),
        ));
    }

    let mut files: Vec<PathBuf> = WalkBuilder::new(&dir)
        .hidden(false)
        .build()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(is_source_extension)
        })
        .collect();
    // Walk order is filesystem-dependent.
    files.sort();

    let mut analysis = ModuleAnalysis {
        module: module.to_string(),
        ..ModuleAnalysis::default()
    };

    for path in &files {
        let display = display_path(root, path);
        analysis.files_scanned += 1;
        match extractor::extract_file(path, &display, policy) {
            Ok(extraction) => {
                analysis.declarations.extend(extraction.declarations);
                analysis.calls.extend(extraction.calls);
            }
            Err(e) => {
                log_skip(&e);
                analysis.files_skipped += 1;
            }
        }
    }

    info!(
        "Analyzed module {:?}: {} files ({} skipped), {} declarations, {} calls",
        module,
        analysis.files_scanned,
        analysis.files_skipped,
        analysis.declarations.len(),
        analysis.calls.len()
    );

    Ok(analysis)
}

fn log_skip(err: &ParseError) {
    debug!("Skipping file: {err}");
}

/// Path relative to the root, with forward slashes for stable keys.
fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_analyze_module_folds_files_and_counts_skips() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let accounts = root.join("accounts");
        fs::create_dir_all(accounts.join("doctype")).unwrap();
        fs::create_dir_all(root.join("stock")).unwrap();

        fs::write(
            accounts.join("ledger.py"),
            "class Ledger:\n    def post(self):\n        validate()\n\ndef validate():\n    pass\n",
        )
        .unwrap();
        fs::write(
            accounts.join("doctype").join("entry.py"),
            "def make_entry():\n    validate()\n",
        )
        .unwrap();
        fs::write(accounts.join("broken.py"), "def nope(:\n").unwrap();
        fs::write(accounts.join("README.md"), "# not python").unwrap();
        fs::write(root.join("stock").join("item.py"), "def item():\n    pass\n").unwrap();

        let analysis =
            analyze_module(root, "accounts", &ExtractionPolicy::default()).unwrap();

        assert_eq!(analysis.module, "accounts");
        assert_eq!(analysis.files_scanned, 3);
        assert_eq!(analysis.files_skipped, 1);
        assert_eq!(analysis.classes().count(), 1);
        let functions: Vec<&str> = analysis.functions().map(|d| d.name.as_str()).collect();
        assert_eq!(functions, vec!["make_entry", "post", "validate"]);
        assert!(
            analysis
                .declarations
                .iter()
                .all(|d| d.file.starts_with("accounts/")),
            "stock module must not leak in"
        );

        let graph = analysis.graph();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.orphans(), vec!["make_entry", "Ledger", "post"]);

        let chunks = analysis.chunks();
        assert_eq!(chunks.len(), 4);
        assert_eq!(
            chunks[0].text,
            "Function make_entry in accounts/doctype/entry.py at line 1"
        );
    }

    #[test]
    fn test_analyze_missing_module() {
        let temp = tempdir().unwrap();
        let err = analyze_module(temp.path(), "nope", &ExtractionPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_module_name_walks_root() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("app.py"), "print(2 + 3)\n").unwrap();
        let analysis = analyze_module(temp.path(), "", &ExtractionPolicy::default()).unwrap();
        assert_eq!(analysis.files_scanned, 1);
        assert_eq!(analysis.calls.len(), 1);
        assert_eq!(analysis.calls[0].caller, "");
        assert_eq!(analysis.calls[0].file, "app.py");
    }
}
