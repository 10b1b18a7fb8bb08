//! Subprocess execution behind a timeout.
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("empty command")]
    EmptyCommand,

    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// A program and its arguments, with optional stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: None,
        }
    }

    /// Expand a `[program, args...]` template, substituting `{name}` placeholders.
    pub fn from_template(template: &[String], vars: &[(&str, &str)]) -> Result<Self, ExecutionError> {
        let expand = |part: &String| {
            vars.iter().fold(part.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        };
        let (program, args) = template.split_first().ok_or(ExecutionError::EmptyCommand)?;
        Ok(Self {
            program: expand(program),
            args: args.iter().map(expand).collect(),
            stdin: None,
        })
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion. A non-zero exit is an error, not an output.
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ExecOutput, ExecutionError>;
}

/// Runs commands as child processes; a child outliving its timeout is killed.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ExecOutput, ExecutionError> {
        debug!("Running {}", cmd.display());
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        // Feeding stdin and draining the output pipes happen together, so a
        // child that writes before it reads cannot stall the exchange.
        let stdin = child.stdin.take();
        let exchange = async move {
            let feed = async move {
                if let (Some(input), Some(mut pipe)) = (cmd.stdin.as_deref(), stdin) {
                    // A child that exits without reading stdin is not an error.
                    let _ = pipe.write_all(input.as_bytes()).await;
                    // Closing the pipe signals end of input.
                    drop(pipe);
                }
            };
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        // Dropping the exchange on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ExecutionError::TimedOut {
                program: cmd.program.clone(),
                secs: timeout.as_secs(),
            })?
            .map_err(|source| ExecutionError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(ExecutionError::NonZeroExit {
                program: cmd.program.clone(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
        })
    }
}

/// Whether `program` can be found on `PATH`.
pub fn program_available(program: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}
