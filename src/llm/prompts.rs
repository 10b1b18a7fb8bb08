//! Prompt templates. QA, migration and repair prompts are kept separate.
use crate::migrate::TargetProfile;
use crate::retriever::RetrievedChunk;

pub const QA_SYSTEM: &str = "You are an expert assistant for this codebase.";

/// Question answering over retrieved chunk summaries.
pub fn qa_prompt(question: &str, context: &[RetrievedChunk]) -> String {
    let mut ctx = String::new();
    for chunk in context {
        ctx.push_str(&chunk.text);
        ctx.push('\n');
    }
    format!(
        "## Context\n{ctx}\n## Question\n{question}\n\n## Instructions\n\
         - Base your answer only on the provided context\n\
         - If the context does not contain the answer, say so\n\
         - Explain clearly\n"
    )
}

pub fn migration_prompt(
    profile: &TargetProfile,
    source_language: &str,
    source_path: &str,
    source: &str,
) -> String {
    let lang = &profile.language;
    format!(
        "You are a senior {lang} engineer migrating {source_language} code to {lang}.\n\n\
         STRICT RULES:\n\
         - Output ONLY valid {lang} code\n\
         - Start with: {header}\n\
         - No markdown, no explanations\n\
         - The {lang} program MUST compile\n\
         - The {lang} program MUST behave exactly like the original\n\
         - Preserve all logic and edge cases\n\
         - Use explicit error handling instead of exceptions\n\
         - Never omit logic\n\n\
         {source_language} file:\n{source_path}\n\n\
         {source_language} code:\n----------------\n{source}\n----------------\n",
        header = profile.required_declaration,
    )
}

/// Ask for a corrected version of `prior` given its diagnostics.
pub fn repair_prompt(profile: &TargetProfile, diagnostics: &[String], prior: &str) -> String {
    let lang = &profile.language;
    let mut errors = String::new();
    for d in diagnostics {
        errors.push_str("- ");
        errors.push_str(d);
        errors.push('\n');
    }
    format!(
        "Fix the following {lang} code using the errors below.\n\
         Output ONLY corrected {lang} code, starting with: {header}\n\n\
         Errors:\n{errors}\n\
         {lang} code:\n----------------\n{prior}\n----------------\n",
        header = profile.required_declaration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_prompt_contains_context_and_question() {
        let ctx = vec![RetrievedChunk {
            ordinal: 0,
            text: "Function post in accounts/ledger.py at line 2".to_string(),
            file: "accounts/ledger.py".to_string(),
            distance: 0.1,
        }];
        let p = qa_prompt("Where is post defined?", &ctx);
        assert!(p.contains("Function post in accounts/ledger.py at line 2"));
        assert!(p.contains("Where is post defined?"));
        assert!(p.contains("only on the provided context"));
    }

    #[test]
    fn test_migration_prompt() {
        let p = migration_prompt(&TargetProfile::go(5), "Python", "calc.py", "print(2 + 3)");
        assert!(p.contains("Start with: package main"));
        assert!(p.contains("print(2 + 3)"));
        assert!(p.contains("calc.py"));
        assert!(p.contains("explicit error handling"));
    }

    #[test]
    fn test_repair_prompt_lists_diagnostics() {
        let p = repair_prompt(
            &TargetProfile::go(5),
            &["brace mismatch: 7 vs 6".to_string()],
            "package main\nfunc main() {",
        );
        assert!(p.contains("- brace mismatch: 7 vs 6"));
        assert!(p.contains("func main() {"));
        assert!(p.contains("Output ONLY corrected Go code"));
        assert!(!p.contains("senior"));
    }
}
