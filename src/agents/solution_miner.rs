//! Solution miner.
//!
//! Turns a resolved failure chain into corrective records. One backend call
//! sees every distinct failure of the chain next to the winning script and
//! may return several records; each record is committed on its own, so one
//! failed write never discards the others.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::knowledge::{with_retries, CorrectiveRecord, CorrectiveStore, NewCorrectiveRecord};
use crate::llm::Backend;
use crate::metrics::MetricsCollector;
use crate::prompts::{build_mining_prompt, MiningFailure};
use crate::sandbox::ErrorSignature;
use crate::utils::{extract_json_payload, tail_chars};

use super::error::{AgentError, AgentResult};
use super::types::ResolvedChain;

const MAX_MINING_ERROR_CHARS: usize = 2000;
const WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// A record proposed by the miner backend, before it is committed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MinedRecord {
    #[serde(default)]
    pub chain_positions: Vec<u32>,
    pub error_pattern: String,
    pub solution: String,
}

/// What happened to one resolved chain.
#[derive(Debug, Clone, Default)]
pub struct MiningReport {
    pub job_id: String,
    pub committed: Vec<CorrectiveRecord>,
    /// Records already present in the store.
    pub duplicates: usize,
    /// Records whose write failed after every retry.
    pub failed: usize,
}

/// Extracts corrective records from resolved failure chains.
pub struct SolutionMiner {
    backend: Backend,
    store: Arc<CorrectiveStore>,
    language: String,
    write_attempts: u32,
    metrics: MetricsCollector,
}

impl SolutionMiner {
    pub fn new(
        backend: Backend,
        store: Arc<CorrectiveStore>,
        language: impl Into<String>,
        write_attempts: u32,
    ) -> Self {
        Self {
            backend,
            store,
            language: language.into(),
            write_attempts,
            metrics: MetricsCollector::new(),
        }
    }

    /// Mine `chain` and commit every record it yields.
    pub async fn mine(&self, chain: ResolvedChain) -> AgentResult<MiningReport> {
        let mut report = MiningReport {
            job_id: chain.job_id.clone(),
            ..Default::default()
        };

        let distinct = chain.distinct_failures();
        if distinct.is_empty() {
            debug!(job_id = %chain.job_id, "Nothing to mine");
            return Ok(report);
        }

        let failures: Vec<MiningFailure> = distinct
            .iter()
            .map(|(position, attempt, signature)| MiningFailure {
                position: *position,
                core_line: signature.core_line.clone(),
                error_text: tail_chars(
                    &attempt.error_text().unwrap_or_default(),
                    MAX_MINING_ERROR_CHARS,
                ),
                script: attempt.script.clone(),
            })
            .collect();

        let prompt = build_mining_prompt(&failures, &chain.winner.script, &self.language)?;
        let reply = self.backend.complete(prompt.into_messages()).await?;

        let signatures: Vec<(u32, &ErrorSignature)> =
            distinct.iter().map(|(pos, _, sig)| (*pos, sig)).collect();
        let records = parse_mined_records(&reply, &signatures)?;

        info!(
            job_id = %chain.job_id,
            failures = distinct.len(),
            proposed = records.len(),
            "Mining resolved chain"
        );

        for record in records {
            let Some(&position) = record.chain_positions.first() else {
                continue;
            };
            let fingerprint = signatures
                .iter()
                .find(|(pos, _)| *pos == position)
                .map(|(_, sig)| sig.fingerprint.clone());
            let new = NewCorrectiveRecord {
                error_pattern: record.error_pattern,
                solution: record.solution,
                fingerprint,
                source_job: chain.job_id.clone(),
                chain_position: position,
            };

            let written = with_retries("corrective_append", self.write_attempts, WRITE_BACKOFF, || {
                let store = Arc::clone(&self.store);
                let new = new.clone();
                async move { store.append(new).await }
            })
            .await;

            match written {
                Ok(Some(committed)) => report.committed.push(committed),
                Ok(None) => report.duplicates += 1,
                Err(e) => {
                    self.metrics.record_store_write_failure("corrective");
                    warn!(
                        job_id = %chain.job_id,
                        pattern = %new.error_pattern,
                        error = %e,
                        "Corrective record lost"
                    );
                    report.failed += 1;
                }
            }
        }

        self.metrics.record_mined(report.committed.len() as u64);
        Ok(report)
    }
}

/// Parse the miner reply into records.
///
/// Accepts a JSON array, a single JSON object, or the plain
/// `Error Pattern: ... / Solution Summary: ...` format. Positions that do not
/// belong to the chain are dropped; records without a valid position are
/// assigned the failure whose core line matches the pattern, or the first
/// failure. Duplicate patterns keep their first occurrence.
pub fn parse_mined_records(
    reply: &str,
    signatures: &[(u32, &ErrorSignature)],
) -> AgentResult<Vec<MinedRecord>> {
    let parsed = extract_json_payload(reply)
        .and_then(|json| {
            serde_json::from_str::<Vec<MinedRecord>>(&json)
                .or_else(|_| serde_json::from_str::<MinedRecord>(&json).map(|r| vec![r]))
                .ok()
        })
        .or_else(|| parse_plain_record(reply).map(|r| vec![r]))
        .ok_or_else(|| {
            AgentError::ResponseParseError(format!(
                "miner reply held no records: {}",
                tail_chars(reply, 200)
            ))
        })?;

    let valid: HashSet<u32> = signatures.iter().map(|(pos, _)| *pos).collect();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for mut record in parsed {
        record.error_pattern = record.error_pattern.trim().to_string();
        record.solution = record.solution.trim().to_string();
        if record.error_pattern.is_empty() || record.solution.is_empty() {
            continue;
        }
        if !seen.insert(record.error_pattern.to_lowercase()) {
            continue;
        }

        record.chain_positions.retain(|pos| valid.contains(pos));
        if record.chain_positions.is_empty() {
            let fallback = signatures
                .iter()
                .find(|(_, sig)| {
                    record.error_pattern.contains(&sig.core_line)
                        || sig.core_line.contains(&record.error_pattern)
                })
                .or_else(|| signatures.first())
                .map(|(pos, _)| *pos);
            record.chain_positions.extend(fallback);
        }
        records.push(record);
    }

    Ok(records)
}

fn plain_record_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)Error Pattern:\s*(?P<pattern>[^\n]+)\s*Solution(?: Summary)?:\s*(?P<solution>.+)")
            .ok()
    })
    .as_ref()
}

fn parse_plain_record(reply: &str) -> Option<MinedRecord> {
    let caps = plain_record_regex()?.captures(reply)?;
    Some(MinedRecord {
        chain_positions: Vec::new(),
        error_pattern: caps.name("pattern")?.as_str().trim().to_string(),
        solution: caps.name("solution")?.as_str().trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{Attempt, FailureChain};
    use crate::config::BackendSpec;
    use crate::knowledge::HashEmbedder;
    use crate::llm::testing::MockLlmProvider;
    use crate::sandbox::Verdict;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn attempt(index: u32, core_line: &str, success: bool) -> Attempt {
        let verdict = if success {
            Verdict::Success { artifacts: vec![] }
        } else {
            Verdict::Failure {
                signature: ErrorSignature::from_core_line(core_line),
                error_text: format!("Traceback (most recent call last):\n{}", core_line),
            }
        };
        Attempt {
            job_id: "job-m".to_string(),
            index,
            round: index,
            origin: "fixer-0".to_string(),
            script: format!("# attempt {}", index),
            working_dir: PathBuf::from("/tmp"),
            stdout: String::new(),
            stderr: String::new(),
            verdict,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn chain_with(core_lines: &[&str]) -> ResolvedChain {
        let mut chain = FailureChain::new("job-m");
        for (i, line) in core_lines.iter().enumerate() {
            chain.push(attempt(i as u32, line, false));
        }
        chain.close(attempt(core_lines.len() as u32, "", true))
    }

    async fn store(dir: &TempDir) -> Arc<CorrectiveStore> {
        Arc::new(
            CorrectiveStore::open(
                &dir.path().join("solutions.db"),
                &dir.path().join("solutions_log.md"),
                Arc::new(HashEmbedder::new(64)),
            )
            .await
            .expect("store"),
        )
    }

    fn miner(reply: &str, store: Arc<CorrectiveStore>) -> SolutionMiner {
        SolutionMiner::new(
            Backend::new(
                BackendSpec::new("miner", 0.1),
                Arc::new(MockLlmProvider::new(vec![reply.to_string()])),
            ),
            store,
            "python",
            2,
        )
    }

    #[tokio::test]
    async fn test_mines_multiple_records_from_one_chain() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let reply = r#"```json
[
  {"chain_positions": [0], "error_pattern": "NameError: name 'elm' is not defined", "solution": "Import schemdraw.elements as elm."},
  {"chain_positions": [2], "error_pattern": "AttributeError: no attribute 'Vcc'", "solution": "Use elm.Vdd for supply rails."}
]
```"#;

        let chain = chain_with(&[
            "NameError: name 'elm' is not defined",
            "TypeError: unsupported operand",
            "AttributeError: module 'schemdraw.elements' has no attribute 'Vcc'",
        ]);
        let report = miner(reply, store.clone()).mine(chain).await.expect("mined");

        assert_eq!(report.committed.len(), 2);
        assert_eq!(report.failed, 0);
        assert_eq!(store.len().await, 2);
        assert_eq!(report.committed[1].chain_position, 2);
        assert!(report.committed[0].fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_repeat_mining_reports_duplicates() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let reply = r#"[{"chain_positions": [0], "error_pattern": "KeyError: 'gnd'", "solution": "Name the ground anchor."}]"#;

        let first = miner(reply, store.clone())
            .mine(chain_with(&["KeyError: 'gnd'"]))
            .await
            .expect("mined");
        let second = miner(reply, store.clone())
            .mine(chain_with(&["KeyError: 'gnd'"]))
            .await
            .expect("mined");

        assert_eq!(first.committed.len(), 1);
        assert_eq!(second.committed.len(), 0);
        assert_eq!(second.duplicates, 1);
    }

    #[tokio::test]
    async fn test_empty_chain_skips_backend() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let provider = Arc::new(MockLlmProvider::new(vec!["[]"]));
        let miner = SolutionMiner::new(
            Backend::new(BackendSpec::new("miner", 0.1), provider.clone()),
            store,
            "python",
            2,
        );

        let report = miner.mine(chain_with(&[])).await.expect("mined");
        assert!(report.committed.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_parse_plain_format() {
        let sig = ErrorSignature::from_core_line("ValueError: bad unit");
        let reply = "Error Pattern: ValueError: bad unit\nSolution Summary: Pass unit as a float.";
        let records = parse_mined_records(reply, &[(3, &sig)]).expect("parsed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chain_positions, vec![3]);
        assert_eq!(records[0].solution, "Pass unit as a float.");
    }

    #[test]
    fn test_parse_drops_invalid_positions_and_duplicates() {
        let a = ErrorSignature::from_core_line("NameError: name 'd' is not defined");
        let b = ErrorSignature::from_core_line("KeyError: 'x'");
        let reply = r#"[
            {"chain_positions": [9], "error_pattern": "KeyError: 'x'", "solution": "Add the key."},
            {"chain_positions": [0], "error_pattern": "keyerror: 'x'", "solution": "Other."},
            {"chain_positions": [0], "error_pattern": " ", "solution": "Blank pattern."}
        ]"#;
        let records = parse_mined_records(reply, &[(0, &a), (1, &b)]).expect("parsed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chain_positions, vec![1]);
    }

    #[test]
    fn test_parse_rejects_prose() {
        let sig = ErrorSignature::from_core_line("KeyError: 'x'");
        let result = parse_mined_records("I am not sure what went wrong.", &[(0, &sig)]);
        assert!(matches!(result, Err(AgentError::ResponseParseError(_))));
    }
}
