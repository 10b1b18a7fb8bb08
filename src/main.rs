use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeatlas::app::AppContext;
use codeatlas::config::Config;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codeatlas", version, about = "Code graph, retrieval QA and validated migration")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract declarations and call edges for a module
    Analyze { module: String },
    /// Embed a module's chunks into its vector index
    BuildIndex {
        module: String,
        /// Rebuild even if the stored index is up to date
        #[arg(long)]
        force: bool,
    },
    /// Answer a question from a module's index
    Ask {
        module: String,
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Translate source files, repairing invalid output
    Migrate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run an original and its translation and compare stdout
    Verify {
        original: PathBuf,
        translated: PathBuf,
        /// File fed to both programs on stdin
        #[arg(long)]
        stdin: Option<PathBuf>,
    },
    /// List declarations nothing calls
    Orphans { module: String },
    /// List stored indices
    Indices,
    /// Remove a module's index
    DropIndex { module: String },
    /// Show the recorded migration attempts for a source file
    History { file: PathBuf },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize report")?
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(&cli.config)?;
    config.validate()?;
    let ctx = AppContext::from_config(config)?;

    match cli.command {
        Command::Analyze { module } => {
            print_json(&ctx.analyze(&module).await?)?;
            Ok(true)
        }
        Command::Orphans { module } => {
            print_json(&ctx.orphans(&module).await?)?;
            Ok(true)
        }
        Command::Indices => {
            print_json(&ctx.indices().await?)?;
            Ok(true)
        }
        Command::DropIndex { module } => {
            let dropped = ctx.drop_index(&module).await?;
            print_json(&serde_json::json!({ "module": module, "dropped": dropped }))?;
            Ok(dropped)
        }
        Command::History { file } => {
            print_json(&ctx.history(&file).await?)?;
            Ok(true)
        }
        Command::BuildIndex { module, force } => {
            print_json(&ctx.build_index(&module, force).await?)?;
            Ok(true)
        }
        Command::Ask {
            module,
            question,
            top_k,
        } => {
            let answer = ctx.ask(&module, &question, top_k).await?;
            print_json(&serde_json::json!({
                "answer": answer.render(),
                "references": answer.references,
            }))?;
            Ok(true)
        }
        Command::Migrate { files } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling in-flight migrations");
                    on_signal.cancel();
                }
            });
            let batch = ctx.migrate(&files, &cancel).await;
            print_json(&batch)?;
            Ok(batch.failed == 0)
        }
        Command::Verify {
            original,
            translated,
            stdin,
        } => {
            let input = match stdin {
                Some(p) => Some(
                    std::fs::read_to_string(&p)
                        .with_context(|| format!("failed to read {}", p.display()))?,
                ),
                None => None,
            };
            let result = ctx.verify(&original, &translated, input.as_deref()).await?;
            print_json(&result)?;
            Ok(result.matched)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("codeatlas {}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            let _ = print_json(&serde_json::json!({ "error": format!("{e:#}") }));
            ExitCode::FAILURE
        }
    }
}
