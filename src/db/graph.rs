use super::{Db, models::AnalysisSummary};
use crate::indexer::core::ModuleAnalysis;
use crate::indexer::extractor::{CallEdge, Declaration, DeclarationKind};
use chrono::Utc;
use rusqlite::{OptionalExtension, Result, params};

impl Db {
    /// Replace the stored analysis of `analysis.module`.
    pub fn save_analysis(&mut self, analysis: &ModuleAnalysis) -> Result<()> {
        let tx = self.conn.transaction()?;

        // Cascades to declarations and call_edges
        tx.execute(
            "DELETE FROM analyses WHERE module = ?",
            params![analysis.module],
        )?;
        tx.execute(
            "INSERT INTO analyses (module, files_scanned, files_skipped, analyzed_at) VALUES (?, ?, ?, ?)",
            params![
                analysis.module,
                analysis.files_scanned as i64,
                analysis.files_skipped as i64,
                Utc::now()
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO declarations (module, position, name, kind, file, line) VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for (i, d) in analysis.declarations.iter().enumerate() {
                stmt.execute(params![
                    analysis.module,
                    i as i64,
                    d.name,
                    d.kind.as_str(),
                    d.file,
                    d.line as i64
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO call_edges (module, position, caller, callee, file) VALUES (?, ?, ?, ?, ?)",
            )?;
            for (i, e) in analysis.calls.iter().enumerate() {
                stmt.execute(params![analysis.module, i as i64, e.caller, e.callee, e.file])?;
            }
        }

        tx.commit()
    }

    /// Load a previously saved analysis, in extraction order.
    pub fn load_analysis(&self, module: &str) -> Result<Option<ModuleAnalysis>> {
        let Some(summary) = self.analysis_summary(module)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT name, kind, file, line FROM declarations WHERE module = ? ORDER BY position",
        )?;
        let declarations = stmt
            .query_map(params![module], |row| {
                let kind: String = row.get(1)?;
                let kind = DeclarationKind::parse(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("unknown declaration kind {kind:?}").into(),
                    )
                })?;
                Ok(Declaration {
                    name: row.get(0)?,
                    kind,
                    file: row.get(2)?,
                    line: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT caller, callee, file FROM call_edges WHERE module = ? ORDER BY position",
        )?;
        let calls = stmt
            .query_map(params![module], |row| {
                Ok(CallEdge {
                    caller: row.get(0)?,
                    callee: row.get(1)?,
                    file: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ModuleAnalysis {
            module: module.to_string(),
            declarations,
            calls,
            files_scanned: summary.files_scanned,
            files_skipped: summary.files_skipped,
        }))
    }

    pub fn analysis_summary(&self, module: &str) -> Result<Option<AnalysisSummary>> {
        self.conn
            .query_row(
                "SELECT module, files_scanned, files_skipped, analyzed_at FROM analyses WHERE module = ?",
                params![module],
                |row| {
                    Ok(AnalysisSummary {
                        module: row.get(0)?,
                        files_scanned: row.get::<_, i64>(1)? as usize,
                        files_skipped: row.get::<_, i64>(2)? as usize,
                        analyzed_at: row.get(3)?,
                    })
                },
            )
            .optional()
    }

}
