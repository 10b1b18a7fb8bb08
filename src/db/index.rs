use super::{Db, models::*, serialize_vector};
use crate::index::VectorIndex;
use crate::indexer::chunker::Chunk;
use chrono::Utc;
use rusqlite::{OptionalExtension, Result, params};

fn map_info(row: &rusqlite::Row<'_>) -> Result<IndexInfo> {
    Ok(IndexInfo {
        module: row.get(0)?,
        dimension: row.get::<_, i64>(1)? as usize,
        chunk_count: row.get::<_, i64>(2)? as usize,
        embedder: row.get(3)?,
        built_at: row.get(4)?,
    })
}

impl Db {
    /// Swap in `index` for its module. Other modules are untouched.
    pub fn replace_index(&mut self, index: &VectorIndex, embedder: &str) -> Result<IndexInfo> {
        let info = IndexInfo {
            module: index.module().to_string(),
            dimension: index.dimension(),
            chunk_count: index.len(),
            embedder: embedder.to_string(),
            built_at: Utc::now(),
        };

        let tx = self.conn.transaction()?;

        // Cascades to chunks and index_entries
        tx.execute("DELETE FROM index_meta WHERE module = ?", params![info.module])?;
        tx.execute(
            "INSERT INTO index_meta (module, dimension, chunk_count, embedder, built_at) VALUES (?, ?, ?, ?, ?)",
            params![
                info.module,
                info.dimension as i64,
                info.chunk_count as i64,
                info.embedder,
                info.built_at
            ],
        )?;

        {
            let mut chunk_stmt = tx.prepare(
                "INSERT INTO chunks (module, ordinal, text, file) VALUES (?, ?, ?, ?)",
            )?;
            let mut entry_stmt = tx.prepare(
                "INSERT INTO index_entries (module, ordinal, embedding) VALUES (?, ?, ?)",
            )?;
            for (ordinal, (chunk, vector)) in index.chunks().iter().zip(index.vectors()).enumerate() {
                chunk_stmt.execute(params![info.module, ordinal as i64, chunk.text, chunk.file])?;
                entry_stmt.execute(params![
                    info.module,
                    ordinal as i64,
                    serialize_vector(vector)
                ])?;
            }
        }

        tx.commit()?;
        Ok(info)
    }

    pub fn index_info(&self, module: &str) -> Result<Option<IndexInfo>> {
        self.conn
            .query_row(
                "SELECT module, dimension, chunk_count, embedder, built_at FROM index_meta WHERE module = ?",
                params![module],
                map_info,
            )
            .optional()
    }

    pub fn list_indices(&self) -> Result<Vec<IndexInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT module, dimension, chunk_count, embedder, built_at FROM index_meta ORDER BY module",
        )?;
        let rows = stmt.query_map([], map_info)?;
        rows.collect()
    }

    /// Stored chunk list of `module`, in ordinal order.
    pub fn load_chunks(&self, module: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ordinal, text, file FROM chunks WHERE module = ? ORDER BY ordinal")?;
        let rows = stmt.query_map(params![module], |row| {
            Ok(Chunk {
                id: row.get::<_, i64>(0)? as usize,
                text: row.get(1)?,
                file: row.get(2)?,
                module: module.to_string(),
            })
        })?;
        rows.collect()
    }

    pub fn delete_index(&self, module: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM index_meta WHERE module = ?", params![module])?;
        Ok(rows > 0)
    }

    /// Exact k-NN over one module under L2 distance; ties go to the lower ordinal.
    ///
    /// The caller checks that `query` has the index dimension.
    pub fn search(&self, module: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.ordinal,
                c.text,
                c.file,
                vec_distance_l2(e.embedding, ?) AS distance
            FROM index_entries e
            JOIN chunks c ON c.module = e.module AND c.ordinal = e.ordinal
            WHERE e.module = ?
            ORDER BY distance ASC, c.ordinal ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(query), module, k as i64],
            |row| {
                Ok(SearchHit {
                    ordinal: row.get::<_, i64>(0)? as usize,
                    text: row.get(1)?,
                    file: row.get(2)?,
                    distance: row.get(3)?,
                })
            },
        )?;
        rows.collect()
    }
}
