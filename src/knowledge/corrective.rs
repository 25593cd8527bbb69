//! Corrective store: mined error pattern to fix records.
//!
//! Records live in a SQLite table guarded by triggers that reject `UPDATE`
//! and `DELETE`, so the table can only grow. An in-memory vector index over
//! the error patterns is loaded on open and extended on every append; readers
//! share it through an `RwLock` while a single writer appends at a time.
//! Every committed record is also appended to a markdown log for humans.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::embedding::{Embedder, Embedding};
use super::vector_index::VectorIndex;
use crate::error::StoreError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS corrective_records (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    error_pattern   TEXT    NOT NULL,
    solution        TEXT    NOT NULL,
    fingerprint     TEXT,
    source_job      TEXT    NOT NULL,
    chain_position  INTEGER NOT NULL,
    embedding       TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    UNIQUE (error_pattern, solution)
);

CREATE INDEX IF NOT EXISTS idx_corrective_fingerprint ON corrective_records(fingerprint);

CREATE TRIGGER IF NOT EXISTS corrective_records_no_update
BEFORE UPDATE ON corrective_records
BEGIN
    SELECT RAISE(ABORT, 'corrective records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS corrective_records_no_delete
BEFORE DELETE ON corrective_records
BEGIN
    SELECT RAISE(ABORT, 'corrective records are append-only');
END;
"#;

/// A committed corrective record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveRecord {
    pub id: u64,
    /// Generalised description of the error.
    pub error_pattern: String,
    /// Fix strategy that resolved it.
    pub solution: String,
    /// Fingerprint of the sandbox error signature the record was mined from.
    pub fingerprint: Option<String>,
    pub source_job: String,
    /// Index of the failed attempt within its failure chain.
    pub chain_position: u32,
    pub created_at: DateTime<Utc>,
}

/// A record about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCorrectiveRecord {
    pub error_pattern: String,
    pub solution: String,
    pub fingerprint: Option<String>,
    pub source_job: String,
    pub chain_position: u32,
}

#[derive(Debug)]
struct Snapshot {
    index: VectorIndex,
    records: HashMap<u64, CorrectiveRecord>,
}

/// SQLite-backed corrective store.
pub struct CorrectiveStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Snapshot>,
    writer: Mutex<()>,
    solutions_log: PathBuf,
}

impl CorrectiveStore {
    /// Open (or create) the store and load its index into memory.
    pub async fn open(
        db_path: &Path,
        solutions_log: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        for path in [db_path, solutions_log] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        let mut snapshot = Snapshot {
            index: VectorIndex::new(embedder.dimension()),
            records: HashMap::new(),
        };

        let rows = sqlx::query(
            "SELECT id, error_pattern, solution, fingerprint, source_job, chain_position, embedding, created_at \
             FROM corrective_records ORDER BY id",
        )
        .fetch_all(&pool)
        .await?;

        for row in rows {
            let record = CorrectiveRecord {
                id: row.get::<i64, _>("id") as u64,
                error_pattern: row.get("error_pattern"),
                solution: row.get("solution"),
                fingerprint: row.get("fingerprint"),
                source_job: row.get("source_job"),
                chain_position: row.get::<i64, _>("chain_position") as u32,
                created_at: parse_timestamp(&row.get::<String, _>("created_at")),
            };

            let stored: Vec<f64> =
                serde_json::from_str(&row.get::<String, _>("embedding")).unwrap_or_default();
            let embedding = if stored.len() == embedder.dimension() {
                Embedding::from_vec(stored)
            } else {
                debug!(id = record.id, "Re-embedding corrective record with stale dimension");
                embedder.embed(&record.error_pattern).await?
            };

            snapshot.index.insert(record.id, embedding)?;
            snapshot.records.insert(record.id, record);
        }

        info!(
            path = %db_path.display(),
            records = snapshot.records.len(),
            "Corrective store opened"
        );

        Ok(Self {
            pool,
            embedder,
            snapshot: RwLock::new(snapshot),
            writer: Mutex::new(()),
            solutions_log: solutions_log.to_path_buf(),
        })
    }

    /// Append a record.
    ///
    /// Returns `Ok(None)` when an identical pattern and solution pair is
    /// already stored. Existing records are never modified.
    pub async fn append(
        &self,
        new: NewCorrectiveRecord,
    ) -> Result<Option<CorrectiveRecord>, StoreError> {
        if new.error_pattern.trim().is_empty() || new.solution.trim().is_empty() {
            return Err(StoreError::InvalidRecord(
                "error_pattern and solution must be non-empty".to_string(),
            ));
        }

        let _writer = self.writer.lock().await;

        let embedding = self.embedder.embed(&new.error_pattern).await?;
        let embedding_json = serde_json::to_string(&embedding.to_vec())?;
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO corrective_records \
             (error_pattern, solution, fingerprint, source_job, chain_position, embedding, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(error_pattern, solution) DO NOTHING",
        )
        .bind(&new.error_pattern)
        .bind(&new.solution)
        .bind(&new.fingerprint)
        .bind(&new.source_job)
        .bind(new.chain_position as i64)
        .bind(&embedding_json)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(pattern = %new.error_pattern, "Corrective record already present");
            return Ok(None);
        }

        let record = CorrectiveRecord {
            id: result.last_insert_rowid() as u64,
            error_pattern: new.error_pattern,
            solution: new.solution,
            fingerprint: new.fingerprint,
            source_job: new.source_job,
            chain_position: new.chain_position,
            created_at,
        };

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.index.insert(record.id, embedding)?;
            snapshot.records.insert(record.id, record.clone());
        }

        if let Err(e) = self.append_markdown(&record).await {
            warn!(
                path = %self.solutions_log.display(),
                error = %e,
                "Failed to append to solutions log"
            );
        }

        info!(
            id = record.id,
            job_id = %record.source_job,
            pattern = %record.error_pattern,
            "Corrective record committed"
        );
        Ok(Some(record))
    }

    /// Records most similar to `query`, best first.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(CorrectiveRecord, f64)>, StoreError> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query).await?;
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .index
            .search(&query, k)
            .into_iter()
            .filter_map(|n| snapshot.records.get(&n.seq).map(|r| (r.clone(), n.score)))
            .collect())
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The `n` most recently committed records, newest first.
    pub async fn recent(&self, n: usize) -> Vec<CorrectiveRecord> {
        let snapshot = self.snapshot.read().await;
        let mut records: Vec<CorrectiveRecord> = snapshot.records.values().cloned().collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(n);
        records
    }

    /// Underlying pool, for inspection tooling.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn append_markdown(&self, record: &CorrectiveRecord) -> Result<(), StoreError> {
        let entry = format!(
            "## Error Pattern: `{}`\n\n- **Recorded:** {}\n- **Source job:** {} (chain position {})\n\n### Solution\n\n{}\n\n---\n\n",
            record.error_pattern.replace('`', "'"),
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.source_job,
            record.chain_position,
            record.solution.trim()
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.solutions_log)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embedding::HashEmbedder;
    use tempfile::TempDir;

    async fn open_store(dir: &Path) -> CorrectiveStore {
        CorrectiveStore::open(
            &dir.join("kb/solutions.db"),
            &dir.join("kb/solutions_log.md"),
            Arc::new(HashEmbedder::new(64)),
        )
        .await
        .expect("store opens")
    }

    fn record(pattern: &str, solution: &str, position: u32) -> NewCorrectiveRecord {
        NewCorrectiveRecord {
            error_pattern: pattern.to_string(),
            solution: solution.to_string(),
            fingerprint: None,
            source_job: "job-1".to_string(),
            chain_position: position,
        }
    }

    #[tokio::test]
    async fn test_opens_path_with_url_characters() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("kb #1 ?v=100%");
        let store = CorrectiveStore::open(
            &dir.join("solutions.db"),
            &dir.join("solutions_log.md"),
            Arc::new(HashEmbedder::new(64)),
        )
        .await
        .expect("store opens");

        store
            .append(record("KeyError: 'vcc'", "Declare the rail first", 0))
            .await
            .expect("append");
        assert!(dir.join("solutions.db").is_file());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_store_search() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;
        assert!(store.search("anything", 3).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn test_append_and_search() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;

        store
            .append(record("AttributeError: no attribute 'Resistr'", "Use elm.Resistor", 0))
            .await
            .expect("append")
            .expect("new record");
        store
            .append(record("TimeoutError: drawing never finished", "Remove the while loop", 1))
            .await
            .expect("append");

        let hits = store
            .search("AttributeError: module has no attribute 'Capacitr'", 1)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.solution, "Use elm.Resistor");

        let log = std::fs::read_to_string(tmp.path().join("kb/solutions_log.md")).expect("log");
        assert!(log.contains("## Error Pattern: `AttributeError: no attribute 'Resistr'`"));
        assert!(log.contains("Remove the while loop"));
    }

    #[tokio::test]
    async fn test_duplicate_is_not_inserted() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;

        assert!(store.append(record("E", "fix", 0)).await.expect("append").is_some());
        assert!(store.append(record("E", "fix", 1)).await.expect("append").is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_blank_record() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;
        assert!(matches!(
            store.append(record("  ", "fix", 0)).await,
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_table_rejects_update_and_delete() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;
        store.append(record("E1", "fix", 0)).await.expect("append");

        let update = sqlx::query("UPDATE corrective_records SET solution = 'changed'")
            .execute(store.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM corrective_records")
            .execute(store.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(store.recent(5).await[0].solution, "fix");
    }

    #[tokio::test]
    async fn test_reopen_preserves_records() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let store = open_store(tmp.path()).await;
            store.append(record("E1", "first", 0)).await.expect("append");
            store.append(record("E2", "second", 1)).await.expect("append");
            store.pool().close().await;
        }

        let store = open_store(tmp.path()).await;
        assert_eq!(store.len().await, 2);
        let recent = store.recent(1).await;
        assert_eq!(recent[0].solution, "second");
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_commit() {
        let tmp = TempDir::new().expect("tempdir");
        let store = Arc::new(open_store(tmp.path()).await);

        let tasks = (0..20).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .append(record(&format!("Error{}: broke", i), "fix", i))
                    .await
                    .expect("append")
            })
        });
        for joined in futures::future::join_all(tasks).await {
            assert!(joined.expect("join").is_some());
        }
        assert_eq!(store.len().await, 20);
    }
}
