//! Cleanup of raw model output before validation.
//!
//! Rules run in [`RULES`] order; each is a pure text transform.
use std::sync::LazyLock;

use regex::Regex;

use super::TargetProfile;

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());

static COMMENTARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(here is|here's|this code|note:|explanation:)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Remove markdown code fences, with or without a language tag.
    StripFences,
    /// Drop lines that open with chatty lead-ins.
    DropCommentary,
    /// Drop `#` lines left over from markdown headings or source comments.
    DropHashLines,
    /// Drop everything before the first header line, when there is one.
    SkipToHeader,
    /// Prepend the required declaration when the text lacks a header.
    EnsureHeader,
}

pub const RULES: &[Rule] = &[
    Rule::StripFences,
    Rule::DropCommentary,
    Rule::DropHashLines,
    Rule::SkipToHeader,
    Rule::EnsureHeader,
];

pub fn apply(rule: Rule, text: &str, profile: &TargetProfile) -> String {
    match rule {
        Rule::StripFences => FENCE.replace_all(text, "").into_owned(),
        Rule::DropCommentary => keep_lines(text, |l| !COMMENTARY.is_match(l)),
        Rule::DropHashLines => keep_lines(text, |l| !l.trim_start().starts_with('#')),
        Rule::SkipToHeader => {
            let marker = format!("{} ", profile.header_prefix);
            let lines: Vec<&str> = text.lines().collect();
            match lines.iter().position(|l| l.trim_start().starts_with(&marker)) {
                Some(start) => lines[start..].join("\n"),
                None => text.to_string(),
            }
        }
        Rule::EnsureHeader => {
            let trimmed = text.trim();
            if trimmed.starts_with(&profile.header_prefix) {
                trimmed.to_string()
            } else {
                format!("{}\n\n{}", profile.required_declaration, trimmed)
            }
        }
    }
}

fn keep_lines(text: &str, keep: impl Fn(&str) -> bool) -> String {
    text.lines().filter(|l| keep(l)).collect::<Vec<_>>().join("\n")
}

/// Run every rule over `raw`. Deterministic and idempotent.
pub fn sanitize(raw: &str, profile: &TargetProfile) -> String {
    let mut text = raw.trim().to_string();
    for rule in RULES {
        text = apply(*rule, &text, profile);
    }
    text
}
