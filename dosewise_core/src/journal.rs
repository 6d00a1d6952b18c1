//! Append-only transition journal.
//!
//! Every committed lifecycle transition is appended to a JSONL file
//! with file locking, forming the audit trail behind the dose record.
//! In-place mutations (snooze, reschedule) keep their history here.

use crate::{DoseEvent, DoseStatus, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One audit record per committed transition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub at: DateTime<Utc>,
    pub operation: String,
    pub event_id: Uuid,
    pub medication_id: Uuid,
    pub patient_id: String,
    pub from_status: DoseStatus,
    pub to_status: DoseStatus,
    pub scheduled_date_time: DateTime<Utc>,
    pub command_id: Option<Uuid>,
    pub taken_at: Option<DateTime<Utc>>,
    pub adherence_score: Option<f64>,
    pub timing_category: Option<String>,
    pub detail: Option<String>,
}

impl TransitionRecord {
    /// Build a record from the pre- and post-transition event
    pub fn for_transition(
        operation: &str,
        at: DateTime<Utc>,
        before: &DoseEvent,
        after: &DoseEvent,
        detail: Option<String>,
    ) -> Self {
        Self {
            at,
            operation: operation.into(),
            event_id: after.id,
            medication_id: after.medication_id,
            patient_id: after.patient_id.clone(),
            from_status: before.status,
            to_status: after.status,
            scheduled_date_time: after.scheduled_date_time,
            command_id: after.command_id,
            taken_at: after.taken_at,
            adherence_score: after.adherence.map(|a| a.score),
            timing_category: after
                .adherence
                .map(|a| format!("{:?}", a.category).to_lowercase()),
            detail,
        }
    }
}

/// Transition sink trait for persisting audit records
pub trait TransitionSink {
    fn append(&mut self, record: &TransitionRecord) -> Result<()>;
}

/// JSONL-based journal with file locking
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Create a new journal for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TransitionSink for JsonlJournal {
    fn append(&mut self, record: &TransitionRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!(
            "Journaled {} for event {}",
            record.operation,
            record.event_id
        );
        Ok(())
    }
}

/// A sink that drops records, for callers that opt out of auditing
#[derive(Default)]
pub struct NullSink;

impl TransitionSink for NullSink {
    fn append(&mut self, _record: &TransitionRecord) -> Result<()> {
        Ok(())
    }
}

/// Read all transition records from a journal file
///
/// Malformed lines are skipped with a warning so one bad write cannot
/// hide the rest of the audit trail.
pub fn read_transitions(path: &Path) -> Result<Vec<TransitionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<TransitionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse journal line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} transitions from journal", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: &str) -> TransitionRecord {
        TransitionRecord {
            at: Utc::now(),
            operation: op.into(),
            event_id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            patient_id: "p1".into(),
            from_status: DoseStatus::Scheduled,
            to_status: DoseStatus::Taken,
            scheduled_date_time: Utc::now(),
            command_id: Some(Uuid::new_v4()),
            taken_at: Some(Utc::now()),
            adherence_score: Some(1.0),
            timing_category: Some("on_time".into()),
            detail: None,
        }
    }

    #[test]
    fn test_append_and_read_single_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");

        let rec = record("take");
        let event_id = rec.event_id;

        let mut journal = JsonlJournal::new(&path);
        journal.append(&rec).unwrap();

        let records = read_transitions(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, event_id);
        assert_eq!(records[0].operation, "take");
    }

    #[test]
    fn test_append_multiple_records() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");

        let mut journal = JsonlJournal::new(&path);
        for op in ["take", "undo", "take", "skip"] {
            journal.append(&record(op)).unwrap();
        }

        let records = read_transitions(&path).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].operation, "undo");
    }

    #[test]
    fn test_read_missing_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let records = read_transitions(&temp_dir.path().join("none.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_bad_line_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");

        let mut journal = JsonlJournal::new(&path);
        journal.append(&record("take")).unwrap();

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("not json\n");
        std::fs::write(&path, contents).unwrap();
        JsonlJournal::new(&path).append(&record("skip")).unwrap();

        let records = read_transitions(&path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
