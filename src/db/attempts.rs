use super::{Db, json_error};
use crate::migrate::{AttemptOutcome, MigrationAttempt};
use rusqlite::{Result, params};

impl Db {
    /// Append one attempt to the history of its source file.
    pub fn insert_attempt(&self, attempt: &MigrationAttempt) -> Result<i64> {
        let diagnostics = serde_json::to_string(&attempt.diagnostics)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            r#"
            INSERT INTO migration_attempts
                (source_file, attempt_number, raw_output, sanitized_output, diagnostics, outcome)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                attempt.source_file,
                attempt.attempt_number as i64,
                attempt.raw_output,
                attempt.sanitized_output,
                diagnostics,
                attempt.outcome.as_str()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every stored attempt for `source_file`, oldest first.
    pub fn list_attempts(&self, source_file: &str) -> Result<Vec<MigrationAttempt>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT source_file, attempt_number, raw_output, sanitized_output, diagnostics, outcome
            FROM migration_attempts
            WHERE source_file = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![source_file], |row| {
            let diagnostics: String = row.get(4)?;
            let outcome: String = row.get(5)?;
            Ok(MigrationAttempt {
                source_file: row.get(0)?,
                attempt_number: row.get::<_, i64>(1)? as usize,
                raw_output: row.get(2)?,
                sanitized_output: row.get(3)?,
                diagnostics: serde_json::from_str(&diagnostics).map_err(|e| json_error(4, e))?,
                outcome: AttemptOutcome::parse(&outcome).unwrap_or(AttemptOutcome::Failed),
            })
        })?;
        rows.collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: usize, outcome: AttemptOutcome) -> MigrationAttempt {
        MigrationAttempt {
            source_file: "calc.py".to_string(),
            attempt_number: n,
            raw_output: "```go\nfunc main() {}\n```".to_string(),
            sanitized_output: "package main\nfunc main() {}".to_string(),
            diagnostics: vec!["brace mismatch: 7 vs 6".to_string()],
            outcome,
        }
    }

    #[test]
    fn test_insert_and_list_attempts() {
        let db = Db::open_in_memory().unwrap();
        db.insert_attempt(&attempt(1, AttemptOutcome::Failed)).unwrap();
        db.insert_attempt(&attempt(2, AttemptOutcome::StructurallyValid))
            .unwrap();

        let history = db.list_attempts("calc.py").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], attempt(1, AttemptOutcome::Failed));
        assert_eq!(history[1].outcome, AttemptOutcome::StructurallyValid);
        assert!(db.list_attempts("other.py").unwrap().is_empty());
    }
}
