//! CSV export of the transition journal for adherence reporting.
//!
//! Rolls the JSONL journal up into an append-only CSV and archives the
//! journal atomically so a crash between the two steps loses nothing.

use crate::journal::TransitionRecord;
use crate::Result;
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    at: String,
    operation: String,
    event_id: String,
    medication_id: String,
    patient_id: String,
    from_status: String,
    to_status: String,
    scheduled: String,
    taken_at: Option<String>,
    adherence_score: Option<f64>,
    timing_category: Option<String>,
    detail: Option<String>,
}

impl From<&TransitionRecord> for CsvRow {
    fn from(record: &TransitionRecord) -> Self {
        CsvRow {
            at: record.at.to_rfc3339(),
            operation: record.operation.clone(),
            event_id: record.event_id.to_string(),
            medication_id: record.medication_id.to_string(),
            patient_id: record.patient_id.clone(),
            from_status: record.from_status.as_str().into(),
            to_status: record.to_status.as_str().into(),
            scheduled: record.scheduled_date_time.to_rfc3339(),
            taken_at: record.taken_at.map(|t| t.to_rfc3339()),
            adherence_score: record.adherence_score,
            timing_category: record.timing_category.clone(),
            detail: record.detail.clone(),
        }
    }
}

/// Roll up journal transitions into CSV and archive the journal
///
/// # Safety
/// - CSV is fsynced before the journal is renamed
/// - The journal is renamed (not deleted) to allow manual recovery
/// - Processed journal files can be cleaned up separately
pub fn journal_to_csv_and_archive(journal_path: &Path, csv_path: &Path) -> Result<usize> {
    let records = crate::journal::read_transitions(journal_path)?;

    if records.is_empty() {
        tracing::info!("No transitions in journal to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    // Headers only when the file is fresh; appends must not repeat them
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} transitions to CSV", records.len());

    let processed_path = journal_path.with_extension("jsonl.processed");
    std::fs::rename(journal_path, &processed_path)?;

    tracing::info!("Archived journal to {:?}", processed_path);

    Ok(records.len())
}

/// Remove all `.processed` journal files in the given directory
pub fn cleanup_processed_journals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Some(extension) = path.extension() {
            if extension == "processed" {
                std::fs::remove_file(&path)?;
                tracing::debug!("Removed processed journal: {:?}", path);
                count += 1;
            }
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed journal files", count);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JsonlJournal, TransitionSink};
    use crate::DoseStatus;
    use chrono::Utc;
    use std::fs::File;
    use uuid::Uuid;

    fn record(operation: &str) -> TransitionRecord {
        TransitionRecord {
            at: Utc::now(),
            operation: operation.into(),
            event_id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            patient_id: "p1".into(),
            from_status: DoseStatus::Scheduled,
            to_status: DoseStatus::Taken,
            scheduled_date_time: Utc::now(),
            command_id: None,
            taken_at: Some(Utc::now()),
            adherence_score: Some(0.95),
            timing_category: Some("on_time".into()),
            detail: None,
        }
    }

    #[test]
    fn test_journal_to_csv_creates_file_and_archives() {
        let temp_dir = tempfile::tempdir().unwrap();
        let journal_path = temp_dir.path().join("transitions.jsonl");
        let csv_path = temp_dir.path().join("adherence.csv");

        let mut journal = JsonlJournal::new(&journal_path);
        for op in ["take", "skip", "missed"] {
            journal.append(&record(op)).unwrap();
        }

        let count = journal_to_csv_and_archive(&journal_path, &csv_path).unwrap();
        assert_eq!(count, 3);

        assert!(csv_path.exists());
        assert!(!journal_path.exists());
        assert!(journal_path.with_extension("jsonl.processed").exists());
    }

    #[test]
    fn test_rollup_appends_without_duplicate_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let journal_path = temp_dir.path().join("transitions.jsonl");
        let csv_path = temp_dir.path().join("adherence.csv");

        JsonlJournal::new(&journal_path)
            .append(&record("take"))
            .unwrap();
        assert_eq!(journal_to_csv_and_archive(&journal_path, &csv_path).unwrap(), 1);

        JsonlJournal::new(&journal_path)
            .append(&record("undo"))
            .unwrap();
        assert_eq!(journal_to_csv_and_archive(&journal_path, &csv_path).unwrap(), 1);

        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 2);
    }

    #[test]
    fn test_empty_journal_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let journal_path = temp_dir.path().join("empty.jsonl");
        let csv_path = temp_dir.path().join("adherence.csv");

        File::create(&journal_path).unwrap();

        let count = journal_to_csv_and_archive(&journal_path, &csv_path).unwrap();
        assert_eq!(count, 0);
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_cleanup_processed_journals() {
        let temp_dir = tempfile::tempdir().unwrap();

        File::create(temp_dir.path().join("a.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("b.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("keep.jsonl")).unwrap();

        let count = cleanup_processed_journals(temp_dir.path()).unwrap();
        assert_eq!(count, 2);
        assert!(temp_dir.path().join("keep.jsonl").exists());
    }
}
