//! Persisted passage index with cosine nearest-neighbour search

use super::RetrievedPassage;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS passages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(source_id);
";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Index connection lock poisoned")]
    Poisoned,
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Thread-safe passage index handle
#[derive(Clone)]
pub struct VectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl VectorIndex {
    /// Open or create the index at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> IndexResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> IndexResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> IndexResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexError::Poisoned)
    }

    /// Store one passage; used by the ingestion side and by tests
    pub fn insert(&self, source_id: &str, text: &str, embedding: &[f32]) -> IndexResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO passages (source_id, text, embedding) VALUES (?1, ?2, ?3)",
            params![source_id, text, encode_embedding(embedding)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn len(&self) -> IndexResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Top `k` passages by cosine similarity, best first. Ties keep
    /// insertion order so results are stable across calls.
    pub fn nearest(&self, query: &[f32], k: usize) -> IndexResult<Vec<RetrievedPassage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, source_id, text, embedding FROM passages ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(3)?;
            let Some(embedding) = decode_embedding(&bytes) else {
                tracing::warn!(passage = id, bytes = bytes.len(), "Skipping passage with malformed embedding");
                continue;
            };
            if embedding.len() != query.len() {
                tracing::warn!(passage = id, dims = embedding.len(), "Skipping passage with mismatched dimensions");
                continue;
            }
            scored.push(RetrievedPassage {
                source_id: row.get(1)?,
                text: row.get(2)?,
                relevance_score: cosine_similarity(query, &embedding),
            });
        }

        // Stable sort: equal scores stay in id order
        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(k);
        Ok(scored)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Cosine similarity clamped to [-1, 1]; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a * norm_b);
    if sim.is_nan() {
        0.0
    } else {
        sim.clamp(-1.0, 1.0)
    }
}
