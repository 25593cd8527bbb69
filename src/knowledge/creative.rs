//! Creative store: the corpus of fully successful scripts.
//!
//! On-disk layout:
//!
//! ```text
//! successful_circuits/
//!   20250309_140507_3f2a9c1d.py   one file per success
//!   metadata.jsonl                one SuccessRecord per line (commit log)
//!   vectors.jsonl                 one {seq, embedding} per line
//! ```
//!
//! A success is written script first, vector second, metadata last; the
//! metadata line is the commit point. Each step is fsynced before the next,
//! so a crash leaves at worst an orphan script file or vector line that is
//! ignored on load, or a torn final line that is cut off on open.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::embedding::{Embedder, Embedding};
use super::vector_index::VectorIndex;
use crate::error::StoreError;

pub const METADATA_FILE: &str = "metadata.jsonl";
pub const VECTORS_FILE: &str = "vectors.jsonl";

/// One committed success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    /// Append sequence number, starting at 1.
    pub seq: u64,
    pub job_id: String,
    /// Script file name relative to the store root.
    pub file_name: String,
    /// Concept the script was generated from.
    pub concept: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorLine {
    seq: u64,
    embedding: Vec<f64>,
}

/// Result of [`CreativeStore::record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(SuccessRecord),
    /// The job already has a success in the store.
    AlreadyRecorded { seq: u64 },
}

/// A retrieved example with its script text.
#[derive(Debug, Clone)]
pub struct ExampleHit {
    pub record: SuccessRecord,
    pub script: String,
    pub score: f64,
}

#[derive(Debug)]
struct Snapshot {
    records: HashMap<u64, SuccessRecord>,
    by_job: HashMap<String, u64>,
    index: VectorIndex,
    next_seq: u64,
}

/// Directory-backed creative store.
pub struct CreativeStore {
    root: PathBuf,
    extension: String,
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Snapshot>,
    writer: Mutex<()>,
}

impl CreativeStore {
    /// Open (or create) the store under `root`.
    ///
    /// `extension` is used for newly written script files.
    pub async fn open(
        root: &Path,
        extension: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(root).await?;

        let records: Vec<SuccessRecord> = read_jsonl(&root.join(METADATA_FILE)).await?;
        let vectors: Vec<VectorLine> = read_jsonl(&root.join(VECTORS_FILE)).await?;

        let mut latest_vectors: HashMap<u64, Vec<f64>> = HashMap::new();
        for line in vectors {
            latest_vectors.insert(line.seq, line.embedding);
        }

        let mut snapshot = Snapshot {
            records: HashMap::new(),
            by_job: HashMap::new(),
            index: VectorIndex::new(embedder.dimension()),
            next_seq: 1,
        };

        for record in records {
            let embedding = match latest_vectors.remove(&record.seq) {
                Some(v) if v.len() == embedder.dimension() => Embedding::from_vec(v),
                _ => embedder.embed(&record.concept).await?,
            };
            snapshot.index.insert(record.seq, embedding)?;
            snapshot.next_seq = snapshot.next_seq.max(record.seq + 1);
            snapshot.by_job.insert(record.job_id.clone(), record.seq);
            snapshot.records.insert(record.seq, record);
        }

        info!(
            path = %root.display(),
            records = snapshot.records.len(),
            "Creative store opened"
        );

        Ok(Self {
            root: root.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
            embedder,
            snapshot: RwLock::new(snapshot),
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Durably record a success. At most one record per `job_id`.
    pub async fn record(
        &self,
        script: &str,
        concept: &str,
        job_id: &str,
    ) -> Result<RecordOutcome, StoreError> {
        if script.trim().is_empty() {
            return Err(StoreError::InvalidRecord("script is empty".to_string()));
        }

        let _writer = self.writer.lock().await;

        let seq = {
            let snapshot = self.snapshot.read().await;
            if let Some(&seq) = snapshot.by_job.get(job_id) {
                return Ok(RecordOutcome::AlreadyRecorded { seq });
            }
            snapshot.next_seq
        };

        let embedding = self.embedder.embed(concept).await?;
        let recorded_at = Utc::now();
        let short_id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let file_name = format!(
            "{}_{}.{}",
            recorded_at.format("%Y%m%d_%H%M%S"),
            short_id,
            self.extension
        );

        self.write_script(&file_name, script).await?;

        let vector_line = VectorLine {
            seq,
            embedding: embedding.to_vec(),
        };
        append_jsonl(&self.root.join(VECTORS_FILE), &vector_line).await?;

        let record = SuccessRecord {
            seq,
            job_id: job_id.to_string(),
            file_name,
            concept: concept.to_string(),
            recorded_at,
        };
        append_jsonl(&self.root.join(METADATA_FILE), &record).await?;

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.index.insert(seq, embedding)?;
            snapshot.next_seq = seq + 1;
            snapshot.by_job.insert(record.job_id.clone(), seq);
            snapshot.records.insert(seq, record.clone());
        }

        info!(seq, job_id, file = %record.file_name, "Success recorded");
        Ok(RecordOutcome::Recorded(record))
    }

    /// The `k` successes whose concepts are closest to `query`.
    ///
    /// An empty store yields an empty list. Entries whose script file has
    /// gone missing are skipped with a warning.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ExampleHit>, StoreError> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(query).await?;
        let matches: Vec<(SuccessRecord, f64)> = {
            let snapshot = self.snapshot.read().await;
            snapshot
                .index
                .search(&query, k)
                .into_iter()
                .filter_map(|n| snapshot.records.get(&n.seq).map(|r| (r.clone(), n.score)))
                .collect()
        };

        let mut hits = Vec::with_capacity(matches.len());
        for (record, score) in matches {
            match tokio::fs::read_to_string(self.root.join(&record.file_name)).await {
                Ok(script) => hits.push(ExampleHit {
                    record,
                    script,
                    score,
                }),
                Err(e) => warn!(
                    file = %record.file_name,
                    error = %e,
                    "Skipping creative example with unreadable script"
                ),
            }
        }
        Ok(hits)
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains_job(&self, job_id: &str) -> bool {
        self.snapshot.read().await.by_job.contains_key(job_id)
    }

    /// All records ordered by sequence number.
    pub async fn records(&self) -> Vec<SuccessRecord> {
        let snapshot = self.snapshot.read().await;
        let mut records: Vec<SuccessRecord> = snapshot.records.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Write the script through a temp file and rename it into place.
    async fn write_script(&self, file_name: &str, script: &str) -> Result<(), StoreError> {
        let root = self.root.clone();
        let target = self.root.join(file_name);
        let script = script.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
            tmp.write_all(script.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist_noclobber(&target).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
    }
}

async fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let committed_len = file.metadata().await?.len();

    let written = async {
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        // Roll back a partial line so a retry starts on a clean boundary.
        if let Err(rollback) = file.set_len(committed_len).await {
            warn!(path = %path.display(), error = %rollback, "Failed to roll back partial append");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Read a JSONL file; a missing file is empty.
///
/// An unparsable or unterminated final line is an interrupted append: it is
/// skipped and cut from the file so the next append starts on a fresh line.
/// An unparsable line elsewhere is corruption.
async fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let chunks: Vec<&str> = raw.split_inclusive('\n').collect();
    let last = chunks.iter().rposition(|c| !c.trim().is_empty());

    let mut values = Vec::with_capacity(chunks.len());
    let mut offset = 0usize;
    let mut torn_at: Option<usize> = None;

    for (line_no, chunk) in chunks.into_iter().enumerate() {
        let start = offset;
        offset += chunk.len();
        let line = chunk.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str(line) {
            Ok(value) if chunk.ends_with('\n') => values.push(value),
            Err(e) if Some(line_no) != last => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    reason: e.to_string(),
                })
            }
            _ => {
                warn!(path = %path.display(), line = line_no + 1, "Dropping truncated trailing entry");
                torn_at = Some(start);
            }
        }
    }

    if let Some(len) = torn_at {
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(len as u64).await?;
        file.sync_all().await?;
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embedding::HashEmbedder;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn open_store(root: &Path) -> CreativeStore {
        CreativeStore::open(root, "py", Arc::new(HashEmbedder::new(64)))
            .await
            .expect("store opens")
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_list() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;
        let hits = store.search("RC filter", 3).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_record_writes_layout() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;

        let outcome = store
            .record("print('rc')", "RC low-pass filter", "job-1")
            .await
            .expect("record");
        let RecordOutcome::Recorded(record) = outcome else {
            panic!("expected new record");
        };

        assert_eq!(record.seq, 1);
        assert!(record.file_name.ends_with(".py"));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join(&record.file_name)).expect("script"),
            "print('rc')"
        );
        let metadata = std::fs::read_to_string(tmp.path().join(METADATA_FILE)).expect("meta");
        assert_eq!(metadata.lines().count(), 1);
        assert!(metadata.contains("\"job_id\":\"job-1\""));
        assert!(tmp.path().join(VECTORS_FILE).exists());
    }

    #[tokio::test]
    async fn test_record_is_idempotent_per_job() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;

        store.record("a", "concept", "job-1").await.expect("first");
        let second = store.record("b", "concept", "job-1").await.expect("second");
        assert_eq!(second, RecordOutcome::AlreadyRecorded { seq: 1 });
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_concept() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(tmp.path()).await;

        store
            .record("print('amp')", "common emitter transistor amplifier", "job-1")
            .await
            .expect("record");
        store
            .record("print('rect')", "full wave bridge rectifier with smoothing capacitor", "job-2")
            .await
            .expect("record");

        let hits = store.search("bridge rectifier", 1).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].script, "print('rect')");
    }

    #[tokio::test]
    async fn test_reopen_restores_index_and_idempotency() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let store = open_store(tmp.path()).await;
            store.record("x", "oscillator", "job-1").await.expect("record");
        }

        let store = open_store(tmp.path()).await;
        assert_eq!(store.len().await, 1);
        assert!(store.contains_job("job-1").await);
        let outcome = store.record("y", "mixer", "job-2").await.expect("record");
        assert!(matches!(outcome, RecordOutcome::Recorded(SuccessRecord { seq: 2, .. })));
    }

    #[tokio::test]
    async fn test_truncated_trailing_line_is_ignored() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let store = open_store(tmp.path()).await;
            store.record("x", "oscillator", "job-1").await.expect("record");
        }
        let meta = tmp.path().join(METADATA_FILE);
        let mut raw = std::fs::read_to_string(&meta).expect("read");
        raw.push_str("{\"seq\": 2, \"job_id\": \"jo");
        std::fs::write(&meta, raw).expect("write");

        let store = open_store(tmp.path()).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_appends_after_torn_line_survive_reopen() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let store = open_store(tmp.path()).await;
            store.record("x", "oscillator", "job-1").await.expect("record");
        }
        let meta = tmp.path().join(METADATA_FILE);
        let mut raw = std::fs::read_to_string(&meta).expect("read");
        raw.push_str("{\"seq\": 2, \"job_id\": \"jo");
        std::fs::write(&meta, raw).expect("write");

        {
            let store = open_store(tmp.path()).await;
            store.record("y", "mixer", "job-2").await.expect("record");
            store.record("z", "filter", "job-3").await.expect("record");
            assert_eq!(store.len().await, 3);
        }

        let store = open_store(tmp.path()).await;
        assert_eq!(store.len().await, 3);
        assert!(store.contains_job("job-2").await);
        assert!(store.contains_job("job-3").await);
        let metadata = std::fs::read_to_string(&meta).expect("meta");
        assert_eq!(metadata.lines().count(), 3);
        assert!(!metadata.contains("\"jo\n"));
    }

    #[tokio::test]
    async fn test_torn_vector_line_is_cut_on_open() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let store = open_store(tmp.path()).await;
            store.record("x", "oscillator", "job-1").await.expect("record");
        }
        let vectors = tmp.path().join(VECTORS_FILE);
        let clean = std::fs::read_to_string(&vectors).expect("read");
        std::fs::write(&vectors, format!("{}{{\"seq\":2,\"embe", clean)).expect("write");

        open_store(tmp.path()).await;
        assert_eq!(std::fs::read_to_string(&vectors).expect("read"), clean);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join(METADATA_FILE), "not json\n{\"also\": \"bad\"}\n")
            .expect("write");
        let result = CreativeStore::open(tmp.path(), "py", Arc::new(HashEmbedder::new(64))).await;
        assert!(matches!(result, Err(StoreError::Corrupt { line: 1, .. })));
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let tmp = TempDir::new().expect("tempdir");
        let store = Arc::new(open_store(tmp.path()).await);

        let tasks = (0..16).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .record(&format!("print({})", i), &format!("concept {}", i), &format!("job-{}", i))
                    .await
                    .expect("record")
            })
        });
        futures::future::join_all(tasks).await;

        let records = store.records().await;
        assert_eq!(records.len(), 16);
        let seqs: HashSet<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs.len(), 16);
        let files: HashSet<&str> = records.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(files.len(), 16);
    }
}
