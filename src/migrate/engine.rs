//! Per-file migration: read, run the loop under the file's gate, persist
//! the attempt history and save successful output.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::repair::RepairLoop;
use super::{MigrateError, MigrationReport};
use crate::db::Db;
use crate::sync::KeyedGate;

/// Outcome of one file in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub source_file: String,
    pub report: Option<MigrationReport>,
    /// Set when the file could not be processed at all.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub files: Vec<BatchEntry>,
}

pub struct MigrationEngine {
    db: Arc<Mutex<Db>>,
    repair_loop: RepairLoop,
    gate: Arc<KeyedGate>,
    output_dir: PathBuf,
    concurrency: usize,
}

impl MigrationEngine {
    pub fn new(
        db: Arc<Mutex<Db>>,
        repair_loop: RepairLoop,
        gate: Arc<KeyedGate>,
        output_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            repair_loop,
            gate,
            output_dir,
            concurrency: concurrency.max(1),
        }
    }

    /// `<output_dir>/<stem>.<ext>` for a source file.
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        self.output_dir
            .join(format!("{stem}.{}", self.repair_loop.profile().extension))
    }

    pub async fn migrate_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrateError> {
        let key = source_key(path).await;
        let _guard = self.gate.acquire(&key).await;

        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MigrateError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Migrating {}", key);

        let report = self.repair_loop.run(&key, &source, cancel).await;
        self.finish(path, report).await
    }

    /// Re-enter the loop for `path` with a diagnostic from outside, e.g. a
    /// compiler run on previously saved output.
    pub async fn repair_file(
        &self,
        path: &Path,
        prior_output: &str,
        diagnostic: &str,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrateError> {
        let key = source_key(path).await;
        let _guard = self.gate.acquire(&key).await;
        let report = self
            .repair_loop
            .repair(&key, prior_output, diagnostic, cancel)
            .await;
        self.finish(path, report).await
    }

    async fn finish(
        &self,
        path: &Path,
        mut report: MigrationReport,
    ) -> Result<MigrationReport, MigrateError> {
        {
            let db = self.db.lock().await;
            for attempt in &report.attempts {
                db.insert_attempt(attempt)?;
            }
        }

        if let Some(output) = &report.output {
            let out = self.output_path(path);
            tokio::fs::create_dir_all(&self.output_dir)
                .await
                .map_err(|source| MigrateError::Write {
                    path: self.output_dir.clone(),
                    source,
                })?;
            tokio::fs::write(&out, output)
                .await
                .map_err(|source| MigrateError::Write {
                    path: out.clone(),
                    source,
                })?;
            info!("Wrote {}", out.display());
            report.output_path = Some(out);
        }
        Ok(report)
    }

    /// Migrate many files concurrently. One file failing never aborts the rest.
    ///
    /// A source whose output path is already claimed by a different source
    /// earlier in the batch is not migrated and is reported as failed.
    pub async fn migrate_files(
        self: &Arc<Self>,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut claims: HashMap<PathBuf, String> = HashMap::new();
        let mut handles = Vec::with_capacity(paths.len());

        for path in paths {
            let output = self.output_path(path);
            let key = source_key(path).await;
            match claims.get(&output) {
                Some(owner) if *owner != key => {
                    warn!("Not migrating {}: {} is taken by {}", key, output.display(), owner);
                    handles.push(Err(MigrateError::OutputCollision {
                        output,
                        claimed_by: owner.clone(),
                    }));
                    continue;
                }
                Some(_) => {}
                None => {
                    claims.insert(output, key);
                }
            }

            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let path = path.clone();
            handles.push(Ok(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                engine.migrate_file(&path, &cancel).await
            })));
        }

        let mut batch = BatchReport::default();
        for (path, handle) in paths.iter().zip(handles) {
            let source_file = path.to_string_lossy().into_owned();
            let result = match handle {
                Ok(handle) => handle.await,
                Err(e) => Ok(Err(e)),
            };
            let entry = match result {
                Ok(Ok(report)) => {
                    if report.succeeded() {
                        batch.succeeded += 1;
                    } else {
                        batch.failed += 1;
                    }
                    BatchEntry {
                        source_file,
                        report: Some(report),
                        error: None,
                    }
                }
                Ok(Err(e)) => {
                    error!("Migration of {} failed: {}", source_file, e);
                    batch.failed += 1;
                    BatchEntry {
                        source_file,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => {
                    error!("Migration task for {} panicked: {}", source_file, e);
                    batch.failed += 1;
                    BatchEntry {
                        source_file,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            batch.files.push(entry);
        }

        info!(
            "Batch migration: {} succeeded, {} failed",
            batch.succeeded, batch.failed
        );
        batch
    }
}

/// Identity of a source file for gating and history: the canonical path
/// when the file exists, otherwise the absolute path.
pub async fn source_key(path: &Path) -> String {
    let resolved = match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    };
    resolved.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Generator;
    use crate::llm::mock::MockGenerator;
    use crate::migrate::{AttemptOutcome, MigrationState, TargetProfile};
    use std::fs;
    use tempfile::tempdir;

    const GOOD: &str =
        "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(2 + 3)\n}";
    const BROKEN: &str = "package main\n\nfunc main() {\n\n\n";

    fn engine(generator: Arc<dyn Generator>, out: &Path) -> (Arc<MigrationEngine>, Arc<Mutex<Db>>) {
        let db = Arc::new(Mutex::new(Db::open_in_memory().unwrap()));
        let repair_loop = RepairLoop::new(generator, TargetProfile::go(5), 2);
        let engine = MigrationEngine::new(
            db.clone(),
            repair_loop,
            Arc::new(KeyedGate::new()),
            out.to_path_buf(),
            2,
        );
        (Arc::new(engine), db)
    }

    #[tokio::test]
    async fn test_migrate_file_writes_output_and_history() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("calc.py");
        fs::write(&src, "print(2 + 3)\n").unwrap();
        let out_dir = temp.path().join("migrations");

        let (engine, db) = engine(Arc::new(MockGenerator::new("m").respond(GOOD)), &out_dir);
        let report = engine
            .migrate_file(&src, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.succeeded());
        let out = report.output_path.clone().unwrap();
        assert_eq!(out, out_dir.join("calc.go"));
        assert_eq!(fs::read_to_string(&out).unwrap(), GOOD);

        let history = db
            .lock()
            .await
            .list_attempts(&source_key(&src).await)
            .unwrap();
        assert_eq!(history, report.attempts);
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_every_attempt() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("calc.py");
        fs::write(&src, "print(2 + 3)\n").unwrap();
        let out_dir = temp.path().join("migrations");

        let (engine, db) = engine(Arc::new(MockGenerator::new("m").respond(BROKEN)), &out_dir);
        let report = engine
            .migrate_file(&src, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, MigrationState::Failed);
        assert!(report.output_path.is_none());
        assert!(!out_dir.join("calc.go").exists());
        let history = db
            .lock()
            .await
            .list_attempts(&source_key(&src).await)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|a| a.outcome == AttemptOutcome::Failed));
    }

    #[tokio::test]
    async fn test_missing_source_is_read_error() {
        let temp = tempdir().unwrap();
        let (engine, _db) = engine(Arc::new(MockGenerator::new("m").respond(GOOD)), temp.path());
        let err = engine
            .migrate_file(&temp.path().join("nope.py"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Read { .. }));
    }

    #[tokio::test]
    async fn test_batch_counts_without_aborting() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.py");
        let b = temp.path().join("b.py");
        fs::write(&a, "print(1)\n").unwrap();
        fs::write(&b, "print(2)\n").unwrap();
        let missing = temp.path().join("missing.py");

        let (engine, _db) = engine(
            Arc::new(MockGenerator::new("m").respond(GOOD)),
            &temp.path().join("out"),
        );
        let batch = engine
            .migrate_files(&[a, missing, b], &CancellationToken::new())
            .await;

        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.files.len(), 3);
        assert!(batch.files[1].error.is_some());
        assert!(temp.path().join("out").join("a.go").exists());
        assert!(temp.path().join("out").join("b.go").exists());
    }

    #[tokio::test]
    async fn test_repair_file_saves_fixed_output() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("calc.py");
        let (engine, _db) = engine(
            Arc::new(MockGenerator::new("m").respond(GOOD)),
            &temp.path().join("out"),
        );
        let report = engine
            .repair_file(
                &src,
                BROKEN,
                "main.go:3:14: syntax error: unexpected EOF",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.succeeded());
        assert!(temp.path().join("out").join("calc.go").exists());
    }

    #[tokio::test]
    async fn test_same_file_by_two_spellings_is_serialized() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        let src = temp.path().join("calc.py");
        fs::write(&src, "print(2 + 3)\n").unwrap();
        let dotted = temp.path().join("sub").join("..").join("calc.py");
        assert_eq!(source_key(&src).await, source_key(&dotted).await);

        let generator = Arc::new(
            MockGenerator::new("m")
                .respond(GOOD)
                .with_delay(std::time::Duration::from_millis(50)),
        );
        let (engine, db) = engine(generator.clone(), &temp.path().join("out"));
        let cancel = CancellationToken::new();
        let (first, second) = tokio::join!(
            engine.migrate_file(&src, &cancel),
            engine.migrate_file(&dotted, &cancel),
        );
        assert!(first.unwrap().succeeded());
        assert!(second.unwrap().succeeded());
        assert_eq!(generator.calls(), 2);
        assert_eq!(generator.peak_concurrency(), 1);

        let history = db.lock().await.list_attempts(&source_key(&src).await).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|a| a.attempt_number == 1));
    }

    #[tokio::test]
    async fn test_batch_reports_output_collisions() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("accounts")).unwrap();
        fs::create_dir_all(temp.path().join("stock")).unwrap();
        let first = temp.path().join("accounts").join("utils.py");
        let second = temp.path().join("stock").join("utils.py");
        fs::write(&first, "print(1)\n").unwrap();
        fs::write(&second, "print(2)\n").unwrap();

        let generator = Arc::new(MockGenerator::new("m").respond(GOOD));
        let (engine, _db) = engine(generator.clone(), &temp.path().join("out"));
        let batch = engine
            .migrate_files(&[first, second], &CancellationToken::new())
            .await;

        assert_eq!((batch.succeeded, batch.failed), (1, 1));
        assert!(batch.files[0].report.as_ref().unwrap().succeeded());
        let error = batch.files[1].error.as_deref().unwrap();
        assert!(error.contains("utils.go"), "{error}");
        assert!(error.contains("accounts"), "{error}");
        assert_eq!(generator.calls(), 1);
    }
}
