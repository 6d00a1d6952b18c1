//! Patient time preferences: lifestyle facts and named time buckets.
//!
//! Preferences are a read-only input to schedule resolution; they are
//! mutated only by explicit preference updates. Persistence uses file
//! locking and atomic rename so concurrent writers cannot corrupt the
//! file.

use crate::{Error, MealType, Result};
use chrono::NaiveTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Acceptable clock range for a time bucket
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    pub earliest: NaiveTime,
    pub latest: NaiveTime,
}

/// A named dose-time bucket (morning, lunch, evening, before bed)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeBucket {
    pub default_time: NaiveTime,
    pub label: String,
    pub time_range: TimeRange,
    pub is_active: bool,
}

impl TimeBucket {
    fn new(label: &str, default: (u32, u32), earliest: (u32, u32), latest: (u32, u32)) -> Self {
        let t = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).expect("valid clock time");
        Self {
            default_time: t(default),
            label: label.into(),
            time_range: TimeRange {
                earliest: t(earliest),
                latest: t(latest),
            },
            is_active: true,
        }
    }

    /// Invariant: earliest < latest and earliest ≤ default ≤ latest
    pub fn validate(&self, field: &str) -> Result<()> {
        if self.time_range.earliest >= self.time_range.latest {
            return Err(Error::validation(
                field,
                "bucket earliest must precede latest",
            ));
        }
        if self.default_time < self.time_range.earliest
            || self.default_time > self.time_range.latest
        {
            return Err(Error::validation(
                field,
                "bucket default_time outside its time_range",
            ));
        }
        Ok(())
    }
}

/// Patient meal times; any of the three may be unknown
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MealTimes {
    pub breakfast: Option<NaiveTime>,
    pub lunch: Option<NaiveTime>,
    pub dinner: Option<NaiveTime>,
}

impl MealTimes {
    pub fn get(&self, meal: MealType) -> Option<NaiveTime> {
        match meal {
            MealType::Breakfast => self.breakfast,
            MealType::Lunch => self.lunch,
            MealType::Dinner => self.dinner,
        }
    }
}

/// Lifestyle facts that anchor relative schedules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lifestyle {
    pub wake_up_time: Option<NaiveTime>,
    pub bed_time: Option<NaiveTime>,
    /// IANA zone name, carried for callers converting at the edge
    pub timezone: String,
    #[serde(default)]
    pub meal_times: MealTimes,
    pub work_schedule: Option<String>,
}

impl Default for Lifestyle {
    fn default() -> Self {
        Self {
            wake_up_time: NaiveTime::from_hms_opt(7, 0, 0),
            bed_time: NaiveTime::from_hms_opt(22, 30, 0),
            timezone: "UTC".into(),
            meal_times: MealTimes::default(),
            work_schedule: None,
        }
    }
}

/// Per-patient lifestyle facts and named time buckets
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientTimePreferences {
    pub patient_id: String,
    pub morning: TimeBucket,
    pub lunch: TimeBucket,
    pub evening: TimeBucket,
    pub before_bed: TimeBucket,
    #[serde(default)]
    pub lifestyle: Lifestyle,
}

impl Default for PatientTimePreferences {
    fn default() -> Self {
        Self {
            patient_id: String::new(),
            morning: TimeBucket::new("Morning", (8, 0), (6, 0), (10, 0)),
            lunch: TimeBucket::new("Lunch", (12, 30), (11, 0), (14, 0)),
            evening: TimeBucket::new("Evening", (18, 30), (17, 0), (20, 0)),
            before_bed: TimeBucket::new("Before bed", (22, 0), (21, 0), (23, 30)),
            lifestyle: Lifestyle::default(),
        }
    }
}

impl PatientTimePreferences {
    /// Validate every bucket's range invariant
    pub fn validate(&self) -> Result<()> {
        self.morning.validate("morning")?;
        self.lunch.validate("lunch")?;
        self.evening.validate("evening")?;
        self.before_bed.validate("before_bed")?;
        Ok(())
    }

    /// Load preferences from a file with shared locking
    ///
    /// Returns defaults if the file doesn't exist. A corrupted file
    /// logs a warning and degrades to defaults rather than blocking
    /// the dose workflow.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No preferences file found, using default preferences");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(
                    "Unable to open preferences file {:?}: {}. Using defaults.",
                    path,
                    e
                );
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!(
                "Unable to lock preferences file {:?}: {}. Using defaults.",
                path,
                e
            );
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!(
                "Failed to read preferences file {:?}: {}. Using defaults.",
                path,
                e
            );
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<PatientTimePreferences>(&contents) {
            Ok(prefs) => {
                tracing::debug!("Loaded preferences for {} from {:?}", prefs.patient_id, path);
                Ok(prefs)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse preferences file {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Save preferences to a file with exclusive locking
    ///
    /// Validates first, then writes to a temp file, syncs, and renames
    /// over the original.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "preferences path missing parent")
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved preferences to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_buckets_valid() {
        let prefs = PatientTimePreferences::default();
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn test_bucket_default_outside_range_rejected() {
        let mut prefs = PatientTimePreferences::default();
        prefs.morning.default_time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let err = prefs.validate().unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "morning"));
    }

    #[test]
    fn test_bucket_inverted_range_rejected() {
        let mut prefs = PatientTimePreferences::default();
        prefs.evening.time_range.earliest = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("prefs.json");

        let mut prefs = PatientTimePreferences::default();
        prefs.patient_id = "p1".into();
        prefs.lifestyle.meal_times.breakfast = NaiveTime::from_hms_opt(8, 0, 0);
        prefs.save(&path).unwrap();

        let loaded = PatientTimePreferences::load(&path).unwrap();
        assert_eq!(loaded.patient_id, "p1");
        assert_eq!(
            loaded.lifestyle.meal_times.get(MealType::Breakfast),
            NaiveTime::from_hms_opt(8, 0, 0)
        );
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let prefs = PatientTimePreferences::load(&temp_dir.path().join("none.json")).unwrap();
        assert!(prefs.patient_id.is_empty());
    }

    #[test]
    fn test_corrupted_prefs_degrade_to_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("prefs.json");
        std::fs::write(&path, "{ not json }").unwrap();

        let prefs = PatientTimePreferences::load(&path).unwrap();
        assert!(prefs.validate().is_ok());
    }
}
