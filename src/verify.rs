//! Behavioral equivalence: run the original and the translation, compare stdout.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::VerificationConfig;
use crate::exec::{CommandSpec, ExecutionError, Executor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub source_output: String,
    pub translated_output: String,
    /// Trimmed stdouts are equal.
    pub matched: bool,
}

pub struct EquivalenceVerifier {
    executor: Arc<dyn Executor>,
    source_command: Vec<String>,
    target_command: Vec<String>,
    timeout: Duration,
}

impl EquivalenceVerifier {
    pub fn new(executor: Arc<dyn Executor>, cfg: &VerificationConfig) -> Self {
        Self {
            executor,
            source_command: cfg.source_command.clone(),
            target_command: cfg.target_command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    /// Run both programs with the same stdin.
    ///
    /// A crash, timeout or missing toolchain on either side is an error,
    /// never a mismatch.
    pub async fn verify(
        &self,
        original: &Path,
        translated: &Path,
        stdin: Option<&str>,
    ) -> Result<VerificationResult, ExecutionError> {
        let stdin = stdin.map(str::to_string);
        let original_path = original.to_string_lossy();
        let translated_path = translated.to_string_lossy();
        let source_cmd =
            CommandSpec::from_template(&self.source_command, &[("file", original_path.as_ref())])?
                .with_stdin(stdin.clone());
        let target_cmd = CommandSpec::from_template(
            &self.target_command,
            &[("file", translated_path.as_ref())],
        )?
        .with_stdin(stdin);

        let (source, target) = tokio::try_join!(
            self.executor.run(&source_cmd, self.timeout),
            self.executor.run(&target_cmd, self.timeout),
        )?;

        let matched = source.stdout.trim() == target.stdout.trim();
        info!(
            "Verified {} against {}: {}",
            translated.display(),
            original.display(),
            if matched { "match" } else { "mismatch" }
        );
        Ok(VerificationResult {
            source_output: source.stdout,
            translated_output: target.stdout,
            matched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecOutput, ProcessExecutor, program_available};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Answers by program name.
    struct FakeExecutor {
        outputs: HashMap<String, Result<String, i32>>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(
            &self,
            cmd: &CommandSpec,
            _timeout: Duration,
        ) -> Result<ExecOutput, ExecutionError> {
            match self.outputs.get(&cmd.program) {
                Some(Ok(stdout)) => Ok(ExecOutput {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_code: Some(0),
                }),
                Some(Err(code)) => Err(ExecutionError::NonZeroExit {
                    program: cmd.program.clone(),
                    code: Some(*code),
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                }),
                None => Err(ExecutionError::Spawn {
                    program: cmd.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }
    }

    fn verifier(outputs: &[(&str, Result<&str, i32>)]) -> EquivalenceVerifier {
        let outputs = outputs
            .iter()
            .map(|(p, r)| (p.to_string(), r.map(str::to_string)))
            .collect();
        EquivalenceVerifier::new(
            Arc::new(FakeExecutor { outputs }),
            &VerificationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_match_ignores_surrounding_whitespace() {
        let v = verifier(&[("python3", Ok("5\n")), ("go", Ok("5"))]);
        let r = v
            .verify(Path::new("calc.py"), Path::new("calc.go"), None)
            .await
            .unwrap();
        assert!(r.matched);
        assert_eq!(r.source_output, "5\n");
    }

    #[tokio::test]
    async fn test_mismatch() {
        let v = verifier(&[("python3", Ok("5\n")), ("go", Ok("6\n"))]);
        let r = v
            .verify(Path::new("calc.py"), Path::new("calc.go"), None)
            .await
            .unwrap();
        assert!(!r.matched);
    }

    #[tokio::test]
    async fn test_crash_is_error_not_mismatch() {
        let v = verifier(&[("python3", Ok("5\n")), ("go", Err(2))]);
        let err = v
            .verify(Path::new("calc.py"), Path::new("calc.go"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExit { code: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_spawn_error() {
        let v = verifier(&[("python3", Ok("5\n"))]);
        let err = v
            .verify(Path::new("calc.py"), Path::new("calc.go"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_real_toolchains_print_five() {
        if !program_available("python3") || !program_available("go") {
            eprintln!("skipping: python3 or go not installed");
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        let py = temp.path().join("calc.py");
        let go = temp.path().join("calc.go");
        std::fs::write(&py, "print(2 + 3)\n").unwrap();
        std::fs::write(
            &go,
            "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(2 + 3)\n}\n",
        )
        .unwrap();

        let cfg = VerificationConfig {
            timeout_secs: 120,
            ..VerificationConfig::default()
        };
        let v = EquivalenceVerifier::new(Arc::new(ProcessExecutor), &cfg);
        let r = v.verify(&py, &go, None).await.unwrap();
        assert!(r.matched);
        assert_eq!(r.translated_output.trim(), "5");
    }
}
