//! The bounded generate, sanitize, validate and repair loop for one file.
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sanitize::sanitize;
use super::validate::{ValidationError, validate};
use super::{AttemptOutcome, MigrationAttempt, MigrationReport, MigrationState, TargetProfile};
use crate::exec::{CommandSpec, ExecutionError, Executor};
use crate::llm::prompts::{migration_prompt, repair_prompt};
use crate::llm::{GenerateOptions, Generator};

/// Optional compile step run on structurally valid output.
pub struct CompileCheck {
    pub executor: Arc<dyn Executor>,
    /// `{file}` is the generated source, `{out}` a scratch output path.
    pub command: Vec<String>,
    pub timeout: Duration,
}

/// Result of the compile step for one attempt.
#[derive(Debug)]
enum CompileVerdict {
    Passed,
    Failed(ValidationError),
    /// The check could not run; the reason is kept on the attempt.
    Skipped(String),
}

impl CompileCheck {
    async fn run(&self, code: &str, profile: &TargetProfile) -> CompileVerdict {
        match self.compile(code, profile).await {
            Ok(verdict) => verdict,
            Err(e) => CompileVerdict::Skipped(format!("could not stage source: {e}")),
        }
    }

    async fn compile(&self, code: &str, profile: &TargetProfile) -> std::io::Result<CompileVerdict> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join(format!("main.{}", profile.extension));
        let out = dir.path().join("main.out");
        tokio::fs::write(&file, code).await?;

        let file = file.to_string_lossy();
        let out = out.to_string_lossy();
        let cmd = match CommandSpec::from_template(
            &self.command,
            &[("file", file.as_ref()), ("out", out.as_ref())],
        ) {
            Ok(cmd) => cmd,
            Err(e) => return Ok(CompileVerdict::Skipped(e.to_string())),
        };

        Ok(match self.executor.run(&cmd, self.timeout).await {
            Ok(_) => CompileVerdict::Passed,
            Err(ExecutionError::NonZeroExit { stderr, stdout, .. }) => {
                let msg = if stderr.trim().is_empty() { stdout } else { stderr };
                CompileVerdict::Failed(ValidationError::Compile(msg.trim().to_string()))
            }
            Err(ExecutionError::TimedOut { secs, .. }) => CompileVerdict::Failed(
                ValidationError::Compile(format!("timed out after {secs}s")),
            ),
            Err(e) => CompileVerdict::Skipped(e.to_string()),
        })
    }
}

pub struct RepairLoop {
    generator: Arc<dyn Generator>,
    profile: TargetProfile,
    source_language: String,
    max_attempts: usize,
    timeout: Duration,
    options: GenerateOptions,
    compile: Option<CompileCheck>,
}

impl RepairLoop {
    pub fn new(generator: Arc<dyn Generator>, profile: TargetProfile, max_attempts: usize) -> Self {
        Self {
            generator,
            profile,
            source_language: "Python".to_string(),
            max_attempts: max_attempts.max(1),
            timeout: Duration::from_secs(400),
            options: GenerateOptions {
                temperature: Some(0.2),
                ..GenerateOptions::default()
            },
            compile: None,
        }
    }

    /// Per generation call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_compile_check(mut self, check: Option<CompileCheck>) -> Self {
        self.compile = check;
        self
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Translate `source`, repairing until valid or out of attempts.
    pub async fn run(
        &self,
        source_file: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> MigrationReport {
        let prompt = migration_prompt(&self.profile, &self.source_language, source_file, source);
        self.drive(source_file, prompt, MigrationState::Generating, cancel)
            .await
    }

    /// Enter at `Repairing` with an externally supplied diagnostic.
    pub async fn repair(
        &self,
        source_file: &str,
        prior_output: &str,
        diagnostic: &str,
        cancel: &CancellationToken,
    ) -> MigrationReport {
        let prompt = repair_prompt(&self.profile, &[diagnostic.to_string()], prior_output);
        self.drive(source_file, prompt, MigrationState::Repairing, cancel)
            .await
    }

    async fn drive(
        &self,
        source_file: &str,
        mut prompt: String,
        mut state: MigrationState,
        cancel: &CancellationToken,
    ) -> MigrationReport {
        let mut attempts: Vec<MigrationAttempt> = Vec::new();

        for attempt_number in 1..=self.max_attempts {
            debug!("{source_file}: attempt {attempt_number} {state:?}");
            let mut attempt = MigrationAttempt {
                source_file: source_file.to_string(),
                attempt_number,
                raw_output: String::new(),
                sanitized_output: String::new(),
                diagnostics: Vec::new(),
                outcome: AttemptOutcome::Pending,
            };

            let raw = match self.generate(&prompt, cancel).await {
                Ok(raw) => raw,
                Err(diagnostic) => {
                    warn!("{source_file}: attempt {attempt_number} {diagnostic}");
                    attempt.diagnostics.push(diagnostic.clone());
                    attempt.outcome = AttemptOutcome::Failed;
                    attempts.push(attempt);
                    return failed(source_file, attempts, diagnostic);
                }
            };

            debug!("{source_file}: attempt {attempt_number} {:?}", MigrationState::Sanitizing);
            let sanitized = sanitize(&raw, &self.profile);
            attempt.raw_output = raw;

            debug!("{source_file}: attempt {attempt_number} {:?}", MigrationState::Validating);
            let mut errors = validate(&sanitized, &self.profile);
            if errors.is_empty() {
                if let Some(check) = &self.compile {
                    match check.run(&sanitized, &self.profile).await {
                        CompileVerdict::Passed => {}
                        CompileVerdict::Failed(e) => errors.push(e),
                        CompileVerdict::Skipped(reason) => {
                            warn!("{source_file}: compile check skipped: {reason}");
                            attempt
                                .diagnostics
                                .push(format!("compile check skipped: {reason}"));
                        }
                    }
                }
            }
            attempt.sanitized_output = sanitized;

            if errors.is_empty() {
                attempt.outcome = AttemptOutcome::StructurallyValid;
                let output = attempt.sanitized_output.clone();
                attempts.push(attempt);
                info!("{source_file}: valid after {attempt_number} attempt(s)");
                return MigrationReport {
                    source_file: source_file.to_string(),
                    state: MigrationState::Succeeded,
                    output: Some(output),
                    output_path: None,
                    attempts,
                    failure: None,
                };
            }

            attempt.diagnostics = errors.iter().map(ToString::to_string).collect();
            attempt.outcome = AttemptOutcome::Failed;
            debug!(
                "{source_file}: attempt {attempt_number} invalid: {}",
                attempt.diagnostics.join("; ")
            );
            prompt = repair_prompt(&self.profile, &attempt.diagnostics, &attempt.sanitized_output);
            attempts.push(attempt);
            state = MigrationState::Repairing;
        }

        let last = attempts
            .last()
            .map(|a| a.diagnostics.join("; "))
            .unwrap_or_default();
        let failure = format!(
            "still invalid after {} attempts: {last}",
            self.max_attempts
        );
        warn!("{source_file}: {failure}");
        failed(source_file, attempts, failure)
    }

    /// One generation call bounded by the timeout and the token.
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("cancelled".to_string()),
            res = tokio::time::timeout(self.timeout, self.generator.generate(prompt, &self.options)) => {
                match res {
                    Err(_) => Err("timed out".to_string()),
                    Ok(Err(e)) => Err(format!("backend error: {e}")),
                    Ok(Ok(text)) => Ok(text),
                }
            }
        }
    }
}

fn failed(source_file: &str, attempts: Vec<MigrationAttempt>, failure: String) -> MigrationReport {
    MigrationReport {
        source_file: source_file.to_string(),
        state: MigrationState::Failed,
        output: None,
        output_path: None,
        attempts,
        failure: Some(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecOutput;
    use crate::llm::FallbackChain;
    use crate::llm::mock::MockGenerator;
    use async_trait::async_trait;

    const GOOD: &str = "```go\npackage main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(2 + 3)\n}\n```";
    const NO_DECL: &str = "import \"fmt\"\n\nfunc main() {\n\tfmt.Println(2 + 3)\n}\n";
    const UNBALANCED: &str = "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(2 + 3)\n";

    fn repair_loop(generator: Arc<dyn Generator>, max_attempts: usize) -> RepairLoop {
        RepairLoop::new(generator, TargetProfile::go(5), max_attempts)
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let g = Arc::new(MockGenerator::new("m").respond(GOOD));
        let report = repair_loop(g.clone(), 3)
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert!(report.succeeded());
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::StructurallyValid);
        assert!(report.output.unwrap().starts_with("package main"));
        assert!(g.prompts()[0].contains("print(2 + 3)"));
    }

    #[tokio::test]
    async fn test_sanitizer_supplies_missing_header() {
        // The header is prepended, so a headerless answer still validates.
        let g = Arc::new(MockGenerator::new("m").respond(NO_DECL));
        let report = repair_loop(g, 3)
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert!(report.succeeded());
        assert!(report.output.unwrap().starts_with("package main\n\nimport"));
    }

    #[tokio::test]
    async fn test_invalid_output_triggers_repair() {
        let g = Arc::new(MockGenerator::new("m").respond(UNBALANCED).respond(GOOD));
        let report = repair_loop(g.clone(), 3)
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert!(report.succeeded());
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(report.attempts[0].diagnostics, vec!["brace mismatch: 1 vs 0"]);
        let repair = &g.prompts()[1];
        assert!(repair.contains("brace mismatch: 1 vs 0"));
        assert!(repair.contains("fmt.Println(2 + 3)"));
    }

    #[tokio::test]
    async fn test_bounded_by_max_attempts() {
        let g = Arc::new(MockGenerator::new("m").respond(UNBALANCED));
        let report = repair_loop(g.clone(), 3)
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert_eq!(report.state, MigrationState::Failed);
        assert_eq!(g.calls(), 3);
        assert_eq!(report.attempts.len(), 3);
        assert!(report.attempts.iter().all(|a| a.outcome == AttemptOutcome::Failed));
        let numbers: Vec<usize> = report.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(report.failure.unwrap().contains("brace mismatch"));
    }

    #[tokio::test]
    async fn test_all_providers_fail_consumes_no_validation() {
        let chain = FallbackChain::new(vec![
            Arc::new(MockGenerator::new("groq").fail("rate limited")),
            Arc::new(MockGenerator::new("ollama").fail("connection refused")),
        ]);
        let report = repair_loop(Arc::new(chain), 3)
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert_eq!(report.state, MigrationState::Failed);
        assert_eq!(report.attempts.len(), 1);
        let a = &report.attempts[0];
        assert_eq!(a.outcome, AttemptOutcome::Failed);
        assert!(a.sanitized_output.is_empty());
        assert_eq!(
            a.diagnostics,
            vec!["backend error: ollama: connection refused"]
        );
    }

    #[tokio::test]
    async fn test_timeout_marks_attempt_failed() {
        let g = Arc::new(
            MockGenerator::new("slow")
                .respond(GOOD)
                .with_delay(Duration::from_secs(5)),
        );
        let report = repair_loop(g, 3)
            .with_timeout(Duration::from_millis(50))
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert_eq!(report.state, MigrationState::Failed);
        assert_eq!(report.attempts[0].diagnostics, vec!["timed out"]);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_marks_attempt_failed() {
        let g = Arc::new(
            MockGenerator::new("slow")
                .respond(GOOD)
                .with_delay(Duration::from_secs(5)),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let report = repair_loop(g, 3).run("calc.py", "x = 1", &token).await;
        assert_eq!(report.failure.as_deref(), Some("cancelled"));
        assert_eq!(report.attempts.len(), 1);
        assert_ne!(report.attempts[0].outcome, AttemptOutcome::Pending);
    }

    #[tokio::test]
    async fn test_repair_entry_uses_external_diagnostic() {
        let g = Arc::new(MockGenerator::new("m").respond(GOOD));
        let report = repair_loop(g.clone(), 2)
            .repair(
                "calc.py",
                "package main\nfunc main() { undefinedThing() }",
                "./main.go:2:15: undefined: undefinedThing",
                &CancellationToken::new(),
            )
            .await;
        assert!(report.succeeded());
        let prompt = &g.prompts()[0];
        assert!(prompt.contains("undefined: undefinedThing"));
        assert!(prompt.starts_with("Fix the following Go code"));
    }

    struct RejectingCompiler;

    #[async_trait]
    impl Executor for RejectingCompiler {
        async fn run(
            &self,
            cmd: &CommandSpec,
            _timeout: Duration,
        ) -> Result<ExecOutput, ExecutionError> {
            Err(ExecutionError::NonZeroExit {
                program: cmd.program.clone(),
                code: Some(1),
                stdout: String::new(),
                stderr: "main.go:6:2: undefined: fmtx\n".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_compile_errors_feed_repair() {
        let g = Arc::new(MockGenerator::new("m").respond(GOOD));
        let check = CompileCheck {
            executor: Arc::new(RejectingCompiler),
            command: vec!["go".into(), "build".into(), "{file}".into()],
            timeout: Duration::from_secs(5),
        };
        let report = repair_loop(g.clone(), 2)
            .with_compile_check(Some(check))
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert_eq!(report.state, MigrationState::Failed);
        assert_eq!(
            report.attempts[0].diagnostics,
            vec!["compile check failed: main.go:6:2: undefined: fmtx"]
        );
        assert!(g.prompts()[1].contains("undefined: fmtx"));
    }

    struct MissingToolchain;

    #[async_trait]
    impl Executor for MissingToolchain {
        async fn run(
            &self,
            cmd: &CommandSpec,
            _timeout: Duration,
        ) -> Result<ExecOutput, ExecutionError> {
            Err(ExecutionError::Spawn {
                program: cmd.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    #[tokio::test]
    async fn test_skipped_compile_check_is_recorded() {
        let g = Arc::new(MockGenerator::new("m").respond(GOOD));
        let check = CompileCheck {
            executor: Arc::new(MissingToolchain),
            command: vec!["go".into(), "build".into(), "{file}".into()],
            timeout: Duration::from_secs(5),
        };
        let report = repair_loop(g, 2)
            .with_compile_check(Some(check))
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert!(report.succeeded());
        let attempt = &report.attempts[0];
        assert_eq!(attempt.outcome, AttemptOutcome::StructurallyValid);
        assert_eq!(attempt.diagnostics.len(), 1);
        assert!(attempt.diagnostics[0].starts_with("compile check skipped: could not start go"));
    }

    #[tokio::test]
    async fn test_empty_compile_command_is_recorded_as_skipped() {
        let g = Arc::new(MockGenerator::new("m").respond(GOOD));
        let check = CompileCheck {
            executor: Arc::new(RejectingCompiler),
            command: Vec::new(),
            timeout: Duration::from_secs(5),
        };
        let report = repair_loop(g, 2)
            .with_compile_check(Some(check))
            .run("calc.py", "print(2 + 3)", &CancellationToken::new())
            .await;
        assert!(report.succeeded());
        assert_eq!(
            report.attempts[0].diagnostics,
            vec!["compile check skipped: empty command"]
        );
    }
}
