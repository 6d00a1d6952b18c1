//! Adherence scoring and the per-patient streak ledger.
//!
//! A take transition earns at most one day credit (the first early or
//! on-time dose of the day). The streak is the run of consecutive
//! credited days; milestones fire once per crossing and are reversed
//! if the credit that crossed them is undone.

use crate::config::AdherenceConfig;
use crate::{AdherenceOutcome, Error, Result, TimingCategory};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Score a taken dose against its scheduled time
///
/// The score starts at 1.0 and decreases monotonically with lateness,
/// reaching 0.0 at `score_floor_minutes`. Early doses score 1.0.
pub fn score_take(
    config: &AdherenceConfig,
    scheduled: DateTime<Utc>,
    taken_at: DateTime<Utc>,
) -> AdherenceOutcome {
    let delta_minutes = (taken_at - scheduled).num_minutes();

    let category = if delta_minutes < -config.early_minutes {
        TimingCategory::Early
    } else if delta_minutes <= config.on_time_minutes {
        TimingCategory::OnTime
    } else if delta_minutes <= config.late_minutes {
        TimingCategory::Late
    } else {
        TimingCategory::VeryLate
    };

    let lateness = delta_minutes.max(0) as f64;
    let floor = config.score_floor_minutes.max(1) as f64;
    let score = (1.0 - lateness / floor).clamp(0.0, 1.0);

    AdherenceOutcome { score, category }
}

/// One credited day in the streak ledger
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DayCredit {
    pub date: NaiveDate,
    /// The dose event that earned the credit; undoing it revokes the day
    pub event_id: Uuid,
}

/// Result of crediting a take against the ledger
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreditOutcome {
    /// Whether this take earned the day's credit
    pub credited: bool,
    pub streak_days: u32,
    /// Milestones crossed by this credit, ascending
    pub milestones: Vec<u32>,
}

/// Per-patient streak ledger
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdherenceLedger {
    pub patient_id: String,
    /// Credited days, ascending by date
    pub credits: Vec<DayCredit>,
    pub milestones_fired: BTreeSet<u32>,
}

impl AdherenceLedger {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }

    /// Consecutive credited days ending at the most recent credit
    pub fn current_streak(&self) -> u32 {
        let mut streak = 0u32;
        let mut expected: Option<NaiveDate> = None;

        for credit in self.credits.iter().rev() {
            match expected {
                None => {
                    streak = 1;
                    expected = Some(credit.date - Duration::days(1));
                }
                Some(want) if credit.date == want => {
                    streak += 1;
                    expected = Some(credit.date - Duration::days(1));
                }
                Some(_) => break,
            }
        }

        streak
    }

    /// Credit an early/on-time take, firing any milestones it crosses
    ///
    /// Late and very-late doses never earn credit; neither does a
    /// second dose on an already-credited day.
    pub fn apply_take(
        &mut self,
        config: &AdherenceConfig,
        event_id: Uuid,
        date: NaiveDate,
        category: TimingCategory,
    ) -> CreditOutcome {
        if !matches!(category, TimingCategory::Early | TimingCategory::OnTime) {
            return CreditOutcome {
                credited: false,
                streak_days: self.current_streak(),
                milestones: Vec::new(),
            };
        }

        if self.credits.iter().any(|c| c.date == date) {
            return CreditOutcome {
                credited: false,
                streak_days: self.current_streak(),
                milestones: Vec::new(),
            };
        }

        let position = self.credits.partition_point(|c| c.date < date);
        self.credits.insert(position, DayCredit { date, event_id });

        let streak = self.current_streak();
        let mut milestones = Vec::new();
        for &m in &config.milestone_days {
            if m <= streak && self.milestones_fired.insert(m) {
                milestones.push(m);
            }
        }

        if !milestones.is_empty() {
            tracing::info!(
                patient_id = %self.patient_id,
                streak,
                ?milestones,
                "Streak milestones reached"
            );
        }

        CreditOutcome {
            credited: true,
            streak_days: streak,
            milestones,
        }
    }

    /// Reverse the credit earned by `event_id`, if any
    ///
    /// Milestones above the shrunken streak un-fire, so a later
    /// re-crossing fires them again. A take that earned no credit
    /// reverses to a no-op.
    pub fn reverse_take(&mut self, event_id: Uuid) {
        let before = self.credits.len();
        self.credits.retain(|c| c.event_id != event_id);
        if self.credits.len() == before {
            return;
        }

        let streak = self.current_streak();
        self.milestones_fired.retain(|&m| m <= streak);
        tracing::debug!(
            patient_id = %self.patient_id,
            streak,
            "Reversed streak credit"
        );
    }

    /// Load the ledger with shared locking, degrading to empty on a
    /// missing or corrupted file (the journal remains the authority)
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No adherence ledger found, starting empty");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open ledger {:?}: {}. Starting empty.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock ledger {:?}: {}. Starting empty.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read ledger {:?}: {}. Starting empty.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<AdherenceLedger>(&contents) {
            Ok(ledger) => Ok(ledger),
            Err(e) => {
                tracing::warn!("Failed to parse ledger {:?}: {}. Starting empty.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save the ledger with exclusive locking and atomic rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "ledger path missing parent")
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdherenceConfig {
        AdherenceConfig::default()
    }

    fn dt(h: u32, m: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_score_categories_from_thresholds() {
        let c = config();
        let scheduled = dt(8, 0);

        assert_eq!(score_take(&c, scheduled, dt(7, 30)).category, TimingCategory::Early);
        assert_eq!(score_take(&c, scheduled, dt(8, 10)).category, TimingCategory::OnTime);
        assert_eq!(score_take(&c, scheduled, dt(9, 30)).category, TimingCategory::Late);
        assert_eq!(score_take(&c, scheduled, dt(12, 30)).category, TimingCategory::VeryLate);
    }

    #[test]
    fn test_score_monotone_in_lateness() {
        let c = config();
        let scheduled = dt(8, 0);

        let on_time = score_take(&c, scheduled, dt(8, 0)).score;
        let late = score_take(&c, scheduled, dt(9, 0)).score;
        let very_late = score_take(&c, scheduled, dt(13, 0)).score;

        assert_eq!(on_time, 1.0);
        assert!(late < on_time);
        assert!(very_late < late);
        assert!(very_late >= 0.0);
    }

    #[test]
    fn test_consecutive_days_build_streak() {
        let mut ledger = AdherenceLedger::new("p1");
        let c = config();

        for day in 10..=12 {
            let outcome =
                ledger.apply_take(&c, Uuid::new_v4(), d(day), TimingCategory::OnTime);
            assert!(outcome.credited);
        }
        assert_eq!(ledger.current_streak(), 3);
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut ledger = AdherenceLedger::new("p1");
        let c = config();

        ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::OnTime);
        ledger.apply_take(&c, Uuid::new_v4(), d(11), TimingCategory::OnTime);
        // Day 12 missed
        let outcome = ledger.apply_take(&c, Uuid::new_v4(), d(13), TimingCategory::Early);
        assert_eq!(outcome.streak_days, 1);
    }

    #[test]
    fn test_late_dose_earns_no_credit() {
        let mut ledger = AdherenceLedger::new("p1");
        let outcome =
            ledger.apply_take(&config(), Uuid::new_v4(), d(10), TimingCategory::Late);
        assert!(!outcome.credited);
        assert_eq!(ledger.current_streak(), 0);
    }

    #[test]
    fn test_second_dose_same_day_no_double_credit() {
        let mut ledger = AdherenceLedger::new("p1");
        let c = config();

        assert!(ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::OnTime).credited);
        assert!(!ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::Early).credited);
        assert_eq!(ledger.current_streak(), 1);
    }

    #[test]
    fn test_milestone_fires_once_per_crossing() {
        let mut ledger = AdherenceLedger::new("p1");
        let mut c = config();
        c.milestone_days = vec![3];

        ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::OnTime);
        ledger.apply_take(&c, Uuid::new_v4(), d(11), TimingCategory::OnTime);
        let third = ledger.apply_take(&c, Uuid::new_v4(), d(12), TimingCategory::OnTime);
        assert_eq!(third.milestones, vec![3]);

        // Day four crosses nothing new
        let fourth = ledger.apply_take(&c, Uuid::new_v4(), d(13), TimingCategory::OnTime);
        assert!(fourth.milestones.is_empty());
    }

    #[test]
    fn test_reverse_is_net_zero() {
        let mut ledger = AdherenceLedger::new("p1");
        let c = config();
        let event_id = Uuid::new_v4();

        ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::OnTime);
        let outcome = ledger.apply_take(&c, event_id, d(11), TimingCategory::OnTime);
        assert_eq!(outcome.streak_days, 2);

        ledger.reverse_take(event_id);
        assert_eq!(ledger.current_streak(), 1);
    }

    #[test]
    fn test_reverse_unfires_crossed_milestone() {
        let mut ledger = AdherenceLedger::new("p1");
        let mut c = config();
        c.milestone_days = vec![2];
        let event_id = Uuid::new_v4();

        ledger.apply_take(&c, Uuid::new_v4(), d(10), TimingCategory::OnTime);
        let crossing = ledger.apply_take(&c, event_id, d(11), TimingCategory::OnTime);
        assert_eq!(crossing.milestones, vec![2]);

        ledger.reverse_take(event_id);

        // Re-crossing fires again
        let again = ledger.apply_take(&c, Uuid::new_v4(), d(11), TimingCategory::OnTime);
        assert_eq!(again.milestones, vec![2]);
    }

    #[test]
    fn test_ledger_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ledger.json");

        let mut ledger = AdherenceLedger::new("p1");
        ledger.apply_take(&config(), Uuid::new_v4(), d(10), TimingCategory::OnTime);
        ledger.save(&path).unwrap();

        let loaded = AdherenceLedger::load(&path).unwrap();
        assert_eq!(loaded.patient_id, "p1");
        assert_eq!(loaded.current_streak(), 1);
    }
}
