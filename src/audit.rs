//! Append-only audit log
//!
//! Every token comparison lands here as one JSON line, alongside the raw
//! annotator payloads that informed it. The log is the system's paper trail
//! (why did this block get patched?) and the input to offline hazard
//! aggregation. Writes are serialized through a mutex; a write failure is
//! reported to the caller but must never abort synthesis, so callers warn
//! and continue.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::ReadingDecision;

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// Outcome of one token comparison.
    Decision(ReadingDecision),
    /// Raw annotator response for one request chunk, kept verbatim so
    /// annotator regressions can be diagnosed after the fact.
    AnnotatorPayload {
        timestamp: DateTime<Utc>,
        chunk_index: usize,
        payload: String,
    },
}

/// Append-only JSONL writer shared across pipeline workers.
#[derive(Debug)]
pub struct DecisionLog {
    file: Mutex<tokio::fs::File>,
    path: PathBuf,
}

impl DecisionLog {
    /// Open for appending, creating the file (and parent directory) if
    /// needed.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(DecisionLog { file: Mutex::new(file), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line and flush.
    pub async fn record(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("serialize log record: {e}")))?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn record_decision(&self, decision: &ReadingDecision) -> Result<()> {
        self.record(&LogRecord::Decision(decision.clone())).await
    }

    pub async fn record_payload(&self, chunk_index: usize, payload: &str) -> Result<()> {
        self.record(&LogRecord::AnnotatorPayload {
            timestamp: Utc::now(),
            chunk_index,
            payload: payload.to_string(),
        })
        .await
    }
}

/// Read every parseable record from a log file.
///
/// Malformed lines (torn writes, hand edits) are skipped with a warning so
/// one bad line cannot poison aggregation.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed log line");
            }
        }
    }
    Ok(records)
}

/// Read only the decision records from a log file.
pub fn read_decisions(path: &Path) -> Result<Vec<ReadingDecision>> {
    Ok(read_log(path)?
        .into_iter()
        .filter_map(|record| match record {
            LogRecord::Decision(decision) => Some(decision),
            LogRecord::AnnotatorPayload { .. } => None,
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Decision, Score};
    use uuid::Uuid;

    fn sample_decision() -> ReadingDecision {
        ReadingDecision {
            timestamp: Utc::now(),
            run_id: Uuid::new_v4(),
            block_id: "block-0001".to_string(),
            line_id: 1,
            surface: "方".to_string(),
            tokenizer_reading: "ホウ".to_string(),
            annotator_reading: Some("ガタ".to_string()),
            engine_reading: "ホウ".to_string(),
            decision: Decision::Patch,
            risk_score: Score::new(0.9),
            applied_reading: Some("ガタ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        let log = DecisionLog::open(&path).await.unwrap();
        log.record_decision(&sample_decision()).await.unwrap();
        log.record_payload(0, r#"[{"line":1,"tokens":[]}]"#).await.unwrap();
        log.record_decision(&sample_decision()).await.unwrap();

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 3);
        let decisions = read_decisions(&path).unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].surface, "方");
        assert_eq!(decisions[0].decision, Decision::Patch);
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        DecisionLog::open(&path)
            .await
            .unwrap()
            .record_decision(&sample_decision())
            .await
            .unwrap();
        DecisionLog::open(&path)
            .await
            .unwrap()
            .record_decision(&sample_decision())
            .await
            .unwrap();

        assert_eq!(read_decisions(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        let log = DecisionLog::open(&path).await.unwrap();
        log.record_decision(&sample_decision()).await.unwrap();
        drop(log);

        // simulate a torn write between two good records
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{\"kind\":\"decision\",\"truncat").unwrap();
        }
        let log = DecisionLog::open(&path).await.unwrap();
        log.record_decision(&sample_decision()).await.unwrap();

        assert_eq!(read_decisions(&path).unwrap().len(), 2);
    }
}
