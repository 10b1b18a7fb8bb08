//! Persistence using SQLite and sqlite-vec
use rusqlite::{Connection, Result};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use tracing::info;

pub mod attempts;
pub mod graph;
pub mod index;
pub mod models;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS analyses (
    module TEXT PRIMARY KEY,
    files_scanned INTEGER NOT NULL,
    files_skipped INTEGER NOT NULL,
    analyzed_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS declarations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    FOREIGN KEY (module) REFERENCES analyses(module) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_decl_module ON declarations(module);
CREATE INDEX IF NOT EXISTS idx_decl_name ON declarations(name);

CREATE TABLE IF NOT EXISTS call_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    position INTEGER NOT NULL,
    caller TEXT NOT NULL,
    callee TEXT NOT NULL,
    file TEXT NOT NULL,
    FOREIGN KEY (module) REFERENCES analyses(module) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_edge_module ON call_edges(module);
CREATE INDEX IF NOT EXISTS idx_edge_callee ON call_edges(callee);

CREATE TABLE IF NOT EXISTS index_meta (
    module TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    embedder TEXT NOT NULL,
    built_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    module TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    file TEXT NOT NULL,
    PRIMARY KEY (module, ordinal),
    FOREIGN KEY (module) REFERENCES index_meta(module) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS index_entries (
    module TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (module, ordinal),
    FOREIGN KEY (module, ordinal) REFERENCES chunks(module, ordinal) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS migration_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_file TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    raw_output TEXT NOT NULL,
    sanitized_output TEXT NOT NULL,
    diagnostics TEXT NOT NULL,
    outcome TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_attempt_file ON migration_attempts(source_file);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A SQLite connection initialized with sqlite-vec and the codeatlas schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());
        init_sqlite_vec();
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

/// Serialize a float32 vector into the little-endian blob sqlite-vec reads.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Map a serde failure into a rusqlite error for a text column.
pub(crate) fn json_error(idx: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory().expect("Failed to open in-memory DB");

        let tables: usize = db.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('analyses', 'declarations', 'call_edges', 'index_meta', 'chunks', 'index_entries', 'migration_attempts');",
            [],
            |row| row.get(0),
        ).unwrap();

        assert_eq!(tables, 7);
    }

    #[test]
    fn test_open_file_twice_keeps_schema() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("atlas.db");
        drop(Db::open(&path).unwrap());
        let db = Db::open(&path).unwrap();
        let n: usize = db
            .conn
            .query_row("SELECT count(*) FROM index_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);

    }
}
