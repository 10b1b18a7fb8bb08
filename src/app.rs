//! Application context shared by the CLI commands.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db::Db;
use crate::db::models::IndexInfo;
use crate::embedder::{self, Embedder};
use crate::exec::{Executor, ProcessExecutor};
use crate::index::{BuildOutcome, IndexBuilder};
use crate::indexer::core::{ModuleAnalysis, analyze_module};
use crate::llm::{self, Generator};
use crate::migrate::engine::{BatchReport, MigrationEngine, source_key};
use crate::migrate::repair::{CompileCheck, RepairLoop};
use crate::migrate::{MigrationAttempt, TargetProfile};
use crate::qa::{QaAnswer, QaService};
use crate::retriever::Retriever;
use crate::sync::KeyedGate;
use crate::verify::{EquivalenceVerifier, VerificationResult};

/// Shared state for every command.
#[derive(Clone)]
pub struct AppContext {
    pub db: Arc<TokioMutex<Db>>,
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub executor: Arc<dyn Executor>,
    /// Serializes index builds per module.
    pub index_gate: Arc<KeyedGate>,
    /// Serializes repair loops per source file.
    pub file_gate: Arc<KeyedGate>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeReport {
    pub module: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub functions: usize,
    pub classes: usize,
    pub call_edges: usize,
    /// Calls made outside any function body.
    pub module_scope_calls: usize,
    pub orphans: usize,
}

#[derive(Debug, Serialize)]
pub struct OrphanReport {
    pub module: String,
    pub declarations: usize,
    pub orphans: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub module: String,
    pub rebuilt: bool,
    pub index: IndexInfo,
}

impl AppContext {
    /// Open the database and build the embedder and generation chain.
    pub fn from_config(config: Config) -> Result<Self> {
        let db = Db::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path))?;
        let embedder =
            embedder::from_config(&config.embedding).context("failed to set up embedder")?;
        let chain = llm::build_chain(&config.providers);
        Ok(Self::new(db, config, embedder, Arc::new(chain)))
    }

    pub fn new(
        db: Db,
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            db: Arc::new(TokioMutex::new(db)),
            config: Arc::new(config),
            embedder,
            generator,
            executor: Arc::new(ProcessExecutor),
            index_gate: Arc::new(KeyedGate::new()),
            file_gate: Arc::new(KeyedGate::new()),
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    async fn run_analysis(&self, module: &str) -> Result<ModuleAnalysis> {
        let root = PathBuf::from(&self.config.source_root);
        let policy = self.config.extraction_policy();
        let m = module.to_string();
        let analysis = tokio::task::spawn_blocking(move || analyze_module(&root, &m, &policy))
            .await
            .context("analysis task failed")?
            .with_context(|| format!("failed to analyze module {module:?}"))?;
        self.db
            .lock()
            .await
            .save_analysis(&analysis)
            .context("failed to save analysis")?;
        Ok(analysis)
    }

    pub async fn analyze(&self, module: &str) -> Result<AnalyzeReport> {
        let analysis = self.run_analysis(module).await?;
        let graph = analysis.graph();
        Ok(AnalyzeReport {
            module: analysis.module.clone(),
            files_scanned: analysis.files_scanned,
            files_skipped: analysis.files_skipped,
            functions: analysis.functions().count(),
            classes: analysis.classes().count(),
            call_edges: graph.edge_count(),
            module_scope_calls: analysis.calls.iter().filter(|c| c.is_module_scope()).count(),
            orphans: graph.orphans().len(),
        })
    }

    /// Orphans of the stored analysis, analysing first when there is none.
    pub async fn orphans(&self, module: &str) -> Result<OrphanReport> {
        let stored = self.db.lock().await.load_analysis(module)?;
        let analysis = match stored {
            Some(a) => a,
            None => self.run_analysis(module).await?,
        };
        Ok(OrphanReport {
            module: module.to_string(),
            declarations: analysis.declarations.len(),
            orphans: analysis.graph().orphans(),
        })
    }

    pub async fn build_index(&self, module: &str, force: bool) -> Result<BuildReport> {
        let analysis = self.run_analysis(module).await?;
        let builder = IndexBuilder::new(
            self.db.clone(),
            self.embedder.clone(),
            self.index_gate.clone(),
        )
        .with_max_chunks(self.config.max_chunks);
        let outcome = builder
            .build(module, analysis.chunks(), force)
            .await
            .with_context(|| format!("failed to build index for {module:?}"))?;
        Ok(match outcome {
            BuildOutcome::Built(index) => BuildReport {
                module: module.to_string(),
                rebuilt: true,
                index,
            },
            BuildOutcome::Unchanged(index) => BuildReport {
                module: module.to_string(),
                rebuilt: false,
                index,
            },
        })
    }

    /// Every stored index, by module.
    pub async fn indices(&self) -> Result<Vec<IndexInfo>> {
        Ok(self.db.lock().await.list_indices()?)
    }

    /// Remove a module's index. `false` when there was none.
    pub async fn drop_index(&self, module: &str) -> Result<bool> {
        let _guard = self.index_gate.acquire(module).await;
        let dropped = self.db.lock().await.delete_index(module)?;
        if dropped {
            info!("Dropped index for {:?}", module);
        }
        Ok(dropped)
    }

    pub async fn ask(&self, module: &str, question: &str, top_k: Option<usize>) -> Result<QaAnswer> {
        let qa = QaService::new(
            Retriever::new(self.db.clone(), self.embedder.clone()),
            self.generator.clone(),
        );
        let answer = qa
            .answer(question, module, top_k.unwrap_or(self.config.search_top_k))
            .await?;
        Ok(answer)
    }

    pub fn migration_engine(&self) -> MigrationEngine {
        let m = &self.config.migration;
        let compile = m.compile_check.then(|| CompileCheck {
            executor: self.executor.clone(),
            command: m.compile_command.clone(),
            timeout: Duration::from_secs(self.config.verification.timeout_secs),
        });
        let repair_loop = RepairLoop::new(
            self.generator.clone(),
            TargetProfile::go(m.min_lines),
            m.max_attempts,
        )
        .with_timeout(Duration::from_secs(m.generation_timeout_secs))
        .with_compile_check(compile);
        MigrationEngine::new(
            self.db.clone(),
            repair_loop,
            self.file_gate.clone(),
            self.config.output_dir(),
            m.concurrency,
        )
    }

    pub async fn migrate(&self, files: &[PathBuf], cancel: &CancellationToken) -> BatchReport {
        let engine = Arc::new(self.migration_engine());
        info!("Migrating {} file(s)", files.len());
        engine.migrate_files(files, cancel).await
    }

    /// Recorded attempts for a source file, oldest first.
    pub async fn history(&self, file: &Path) -> Result<Vec<MigrationAttempt>> {
        let key = source_key(file).await;
        Ok(self.db.lock().await.list_attempts(&key)?)
    }

    pub async fn verify(
        &self,
        original: &Path,
        translated: &Path,
        stdin: Option<&str>,
    ) -> Result<VerificationResult> {
        let verifier = EquivalenceVerifier::new(self.executor.clone(), &self.config.verification);
        let result = verifier.verify(original, translated, stdin).await?;
        Ok(result)
    }
}
