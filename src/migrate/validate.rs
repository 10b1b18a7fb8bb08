//! Structural checks on sanitized output.
use thiserror::Error;

use super::TargetProfile;

/// One failed structural check. `Display` is the diagnostic text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing top-level declaration")]
    MissingDeclaration,

    #[error("brace mismatch: {open} vs {close}")]
    BraceMismatch { open: usize, close: usize },

    #[error("unsupported syntax: {label} \"{pattern}\"")]
    ForbiddenSyntax { label: String, pattern: String },

    #[error("output too short: {lines} lines (minimum {min})")]
    TooShort { lines: usize, min: usize },

    #[error("compile check failed: {0}")]
    Compile(String),
}

/// Every failing check, in check order. Empty means structurally valid.
pub fn validate(code: &str, profile: &TargetProfile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !code.contains(&profile.required_declaration) {
        errors.push(ValidationError::MissingDeclaration);
    }

    let open = code.matches('{').count();
    let close = code.matches('}').count();
    if open != close {
        errors.push(ValidationError::BraceMismatch { open, close });
    }

    for f in &profile.forbidden {
        if code.contains(&f.pattern) {
            errors.push(ValidationError::ForbiddenSyntax {
                label: f.label.clone(),
                pattern: f.pattern.clone(),
            });
        }
    }

    let lines = code.lines().count();
    if lines < profile.min_lines {
        errors.push(ValidationError::TooShort {
            lines,
            min: profile.min_lines,
        });
    }

    errors
}
