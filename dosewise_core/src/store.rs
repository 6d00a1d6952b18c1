//! Durable store of concrete dose events.
//!
//! The store owns every `DoseEvent` and is the only place they are
//! created or replaced. Materialization is idempotent: events are keyed
//! by (medication_id, scheduled_date_time) and an existing event is
//! never overwritten, so re-running resolution after a schedule edit
//! cannot clobber an in-flight or completed dose.

use crate::{
    DoseEvent, DoseStatus, Error, Medication, MedicationSchedule, ResolvedDose, Result,
};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// In-memory dose event store with snapshot persistence
#[derive(Clone, Debug, Default)]
pub struct DoseEventStore {
    events: HashMap<Uuid, DoseEvent>,
    /// (medication_id, scheduled_date_time) → event id
    by_key: HashMap<(Uuid, DateTime<Utc>), Uuid>,
}

impl DoseEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&DoseEvent> {
        self.events.get(&id)
    }

    /// Get an event or fail with a typed NotFound
    pub fn fetch(&self, id: Uuid) -> Result<&DoseEvent> {
        self.events.get(&id).ok_or(Error::NotFound {
            kind: "dose event",
            id: id.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DoseEvent> {
        self.events.values()
    }

    /// Replace an event previously fetched from this store
    ///
    /// This is the lifecycle engine's commit point: the transition is
    /// applied to a copy and only lands here once fully computed.
    pub fn commit(&mut self, event: DoseEvent) {
        self.by_key.insert(event.natural_key(), event.id);
        self.events.insert(event.id, event);
    }

    /// Remove a stale natural-key index entry after a reschedule moved
    /// the event to a new slot
    pub(crate) fn unindex(&mut self, key: (Uuid, DateTime<Utc>)) {
        self.by_key.remove(&key);
    }

    /// Materialize resolved dose times into events for one date
    ///
    /// Creates an event per resolved time that has no existing event at
    /// the same (medication, datetime) key. Existing events — whatever
    /// their status — are left untouched. Returns how many events were
    /// created.
    pub fn materialize(
        &mut self,
        schedule: &MedicationSchedule,
        medication: &Medication,
        resolved: &[ResolvedDose],
        date: NaiveDate,
    ) -> usize {
        let mut created = 0;

        for dose in resolved {
            let scheduled = date.and_time(dose.time).and_utc();
            let key = (schedule.medication_id, scheduled);
            if self.by_key.contains_key(&key) {
                continue;
            }

            let event = DoseEvent {
                id: Uuid::new_v4(),
                command_id: None,
                schedule_id: schedule.id,
                medication_id: schedule.medication_id,
                patient_id: schedule.patient_id.clone(),
                scheduled_date_time: scheduled,
                dosage_amount: schedule.dosage_amount.clone(),
                instructions: schedule
                    .instructions
                    .clone()
                    .or_else(|| medication.instructions.clone()),
                status: DoseStatus::Scheduled,
                approximate: dose.approximate,
                taken_at: None,
                adherence: None,
                skip_reason: None,
                skip_notes: None,
                snoozed_until: None,
                undo_available_until: None,
            };

            self.by_key.insert(key, event.id);
            self.events.insert(event.id, event);
            created += 1;
        }

        if created > 0 {
            tracing::info!(
                schedule_id = %schedule.id,
                %date,
                created,
                "Materialized dose events"
            );
        }

        created
    }

    /// All of a patient's events scheduled on `date`, ordered by time
    pub fn events_for_day(&self, patient_id: &str, date: NaiveDate) -> Vec<&DoseEvent> {
        let mut events: Vec<&DoseEvent> = self
            .events
            .values()
            .filter(|e| e.patient_id == patient_id && e.scheduled_date_time.date_naive() == date)
            .collect();
        events.sort_by_key(|e| e.scheduled_date_time);
        events
    }

    /// All events belonging to one schedule, ordered by time
    pub fn events_for_schedule(&self, schedule_id: Uuid) -> Vec<&DoseEvent> {
        let mut events: Vec<&DoseEvent> = self
            .events
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .collect();
        events.sort_by_key(|e| e.scheduled_date_time);
        events
    }

    /// Load the event snapshot from a file with shared locking
    ///
    /// A missing file is an empty store. A corrupted snapshot is a hard
    /// error: dose events are the adherence record and must not
    /// silently vanish behind defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No event snapshot found, starting empty");
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read_result = reader.read_to_string(&mut contents);
        file.unlock()?;
        read_result?;

        let events: Vec<DoseEvent> = serde_json::from_str(&contents)?;
        let mut store = Self::default();
        for event in events {
            store.by_key.insert(event.natural_key(), event.id);
            store.events.insert(event.id, event);
        }

        tracing::debug!("Loaded {} dose events from {:?}", store.len(), path);
        Ok(store)
    }

    /// Save the event snapshot with exclusive locking and atomic rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "snapshot path missing parent")
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut events: Vec<&DoseEvent> = self.events.values().collect();
            // Stable order keeps snapshots diffable
            events.sort_by_key(|e| (e.scheduled_date_time, e.id));

            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&events)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} dose events to {:?}", self.len(), path);
        Ok(())
    }
}
