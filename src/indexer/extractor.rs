//! Per-file declaration and call extraction.
//!
//! Extraction is a pure function of the source bytes: it returns a
//! [`FileExtraction`] value and the caller folds those into a module-level
//! result. The syntax tree is walked in document order with an explicit
//! scope stack of enclosing function declarations.
use super::languages::LanguageConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    Function,
    Class,
}

impl DeclarationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::Function => "function",
            DeclarationKind::Class => "class",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(DeclarationKind::Function),
            "class" => Some(DeclarationKind::Class),
            _ => None,
        }
    }
}

/// A named function or class found in a source file.
///
/// Identified by `(file, name, line)`; names alone repeat across files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub file: String,
    pub line: usize,
}

/// A call observed while `caller` was the enclosing declaration.
///
/// `caller` is empty for calls made at module scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    pub file: String,
}

impl CallEdge {
    pub fn is_module_scope(&self) -> bool {
        self.caller.is_empty()
    }
}

/// Which enclosing function a call inside nested functions belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallAttribution {
    /// The outermost enclosing function (shallow attribution).
    #[default]
    Outermost,
    /// The nearest enclosing function.
    Innermost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionPolicy {
    pub attribution: CallAttribution,
    pub record_module_scope_calls: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            attribution: CallAttribution::default(),
            record_module_scope_calls: true,
        }
    }
}

impl ExtractionPolicy {
    fn caller<'s>(&self, scopes: &'s [String]) -> Option<&'s str> {
        let scope = match self.attribution {
            CallAttribution::Outermost => scopes.first(),
            CallAttribution::Innermost => scopes.last(),
        };
        scope.map(String::as_str)
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file type: {0}")]
    UnsupportedLanguage(String),

    #[error("parser setup failed: {0}")]
    Language(String),

    #[error("syntax error in {file} near line {line}")]
    Syntax { file: String, line: usize },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FileExtraction {
    pub declarations: Vec<Declaration>,
    pub calls: Vec<CallEdge>,
}

enum Step<'t> {
    Enter(Node<'t>),
    Leave,
}

/// Read and extract a file, choosing the grammar by extension.
///
/// `display_path` is what gets recorded in declarations and edges.
pub fn extract_file(
    path: &Path,
    display_path: &str,
    policy: &ExtractionPolicy,
) -> Result<FileExtraction, ParseError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = LanguageConfig::get_by_extension(ext)
        .ok_or_else(|| ParseError::UnsupportedLanguage(ext.to_string()))?;

    let source = fs::read_to_string(path).map_err(|e| ParseError::Io {
        file: display_path.to_string(),
        source: e,
    })?;

    extract_source(&config, source.as_bytes(), display_path, policy)
}

/// Extract declarations and calls from in-memory source.
///
/// A tree containing syntax errors is rejected as a whole.
pub fn extract_source(
    config: &LanguageConfig,
    source: &[u8],
    file: &str,
    policy: &ExtractionPolicy,
) -> Result<FileExtraction, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&config.language)
        .map_err(|e| ParseError::Language(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or_else(|| ParseError::Syntax {
        file: file.to_string(),
        line: 1,
    })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ParseError::Syntax {
            file: file.to_string(),
            line: first_error_line(root).unwrap_or(1),
        });
    }

    let mut out = FileExtraction::default();
    let mut scopes: Vec<String> = Vec::new();
    let mut stack = vec![Step::Enter(root)];

    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Leave => {
                scopes.pop();
                continue;
            }
            Step::Enter(node) => node,
        };

        let kind = node.kind();
        if config.is_function(kind) {
            if let Some(name) = field_text(node, "name", source) {
                out.declarations.push(Declaration {
                    name: name.clone(),
                    kind: DeclarationKind::Function,
                    file: file.to_string(),
                    line: node.start_position().row + 1,
                });
                scopes.push(name);
                stack.push(Step::Leave);
            }
        } else if config.is_class(kind) {
            if let Some(name) = field_text(node, "name", source) {
                out.declarations.push(Declaration {
                    name,
                    kind: DeclarationKind::Class,
                    file: file.to_string(),
                    line: node.start_position().row + 1,
                });
            }
        } else if kind == config.call_kind {
            if let Some(callee) = callee_name(config, node, source) {
                match policy.caller(&scopes) {
                    Some(caller) => out.calls.push(CallEdge {
                        caller: caller.to_string(),
                        callee,
                        file: file.to_string(),
                    }),
                    None if policy.record_module_scope_calls => out.calls.push(CallEdge {
                        caller: String::new(),
                        callee,
                        file: file.to_string(),
                    }),
                    None => {}
                }
            }
        }

        // Reverse so children pop in document order.
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(Step::Enter(child));
        }
    }

    Ok(out)
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    let child = node.child_by_field_name(field)?;
    let text = child.utf8_text(source).ok()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn callee_name(config: &LanguageConfig, call: Node, source: &[u8]) -> Option<String> {
    let callee = call.child_by_field_name(config.callee_field)?;
    if callee.kind() != config.callee_name_kind {
        return None;
    }
    callee.utf8_text(source).ok().map(|s| s.to_string())
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    None
}
