//! Core domain types for the Dosewise medication engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Medications and their schedules
//! - Timing rules (the four dose-time strategies)
//! - Dose events and their lifecycle status
//! - Safety alerts and patient safety profiles

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Medication Types
// ============================================================================

/// A medication in a patient's directory
///
/// Medications are deactivated, never deleted, so adherence history
/// stays attached to a real record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub patient_id: String,
    pub name: String,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    pub dosage: String,
    pub instructions: Option<String>,
    pub is_prn: bool,
    pub is_active: bool,
    pub prescribed_date: NaiveDate,
    pub prescribed_by: Option<String>,
}

impl Medication {
    /// All names this medication answers to (trade, generic, brand)
    pub fn known_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.generic_name.as_deref())
            .chain(self.brand_name.as_deref())
    }
}

// ============================================================================
// Schedule Timing Types
// ============================================================================

/// Meal anchors for meal-relative dosing
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

/// Sleep anchors for sleep-relative dosing
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SleepAnchor {
    Bedtime,
    WakeTime,
}

/// Timing rule with type-safe variants, one per strategy
///
/// The tag doubles as the wire-level `timing_type`, so a payload can
/// never disagree with its declared strategy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "timing_type", rename_all = "snake_case")]
pub enum TimingRule {
    /// Fixed clock times (e.g., 08:00 and 20:00)
    Absolute { times: Vec<NaiveTime> },
    /// Offset from one of the patient's meals
    MealRelative {
        meal_type: MealType,
        /// Negative = before the meal
        offset_minutes: i32,
        is_flexible: bool,
        fallback_time: NaiveTime,
    },
    /// Offset from bedtime or wake time
    SleepRelative {
        relative_to: SleepAnchor,
        offset_minutes: i32,
        fallback_time: NaiveTime,
    },
    /// Every N hours within a daily window
    Interval {
        interval_hours: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
        avoid_sleep_hours: bool,
        max_doses_per_day: u8,
    },
}

impl TimingRule {
    /// Short name of the strategy, for logging and journal entries
    pub fn kind(&self) -> &'static str {
        match self {
            TimingRule::Absolute { .. } => "absolute",
            TimingRule::MealRelative { .. } => "meal_relative",
            TimingRule::SleepRelative { .. } => "sleep_relative",
            TimingRule::Interval { .. } => "interval",
        }
    }
}

/// A medication's dosing schedule
///
/// Exactly one schedule may be active per medication; activating a new
/// one deactivates (never deletes) the prior so history survives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicationSchedule {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub patient_id: String,
    pub timing: TimingRule,
    pub dosage_amount: String,
    pub instructions: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_indefinite: bool,
    /// Minutes-before-dose reminder offsets, ascending
    pub reminder_minutes_before: Vec<u32>,
    pub is_active: bool,
}

impl MedicationSchedule {
    /// Validate payload invariants
    ///
    /// Returns the offending field in the error so callers can surface
    /// exactly what was rejected.
    pub fn validate(&self) -> Result<()> {
        if self.is_indefinite && self.end_date.is_some() {
            return Err(Error::validation(
                "end_date",
                "end_date and is_indefinite are mutually exclusive",
            ));
        }
        if !self.is_indefinite && self.end_date.is_none() {
            return Err(Error::validation(
                "end_date",
                "schedule must either set end_date or be indefinite",
            ));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(Error::validation(
                    "end_date",
                    format!("end_date {} precedes start_date {}", end, self.start_date),
                ));
            }
        }

        match &self.timing {
            TimingRule::Absolute { times } => {
                if times.is_empty() {
                    return Err(Error::validation(
                        "times",
                        "absolute schedule requires at least one time",
                    ));
                }
            }
            TimingRule::Interval {
                interval_hours,
                start_time,
                end_time,
                max_doses_per_day,
                ..
            } => {
                if !(1..=24).contains(interval_hours) {
                    return Err(Error::validation(
                        "interval_hours",
                        format!("interval_hours {} outside [1, 24]", interval_hours),
                    ));
                }
                if !(1..=12).contains(max_doses_per_day) {
                    return Err(Error::validation(
                        "max_doses_per_day",
                        format!("max_doses_per_day {} outside [1, 12]", max_doses_per_day),
                    ));
                }
                if end_time < start_time {
                    return Err(Error::validation(
                        "end_time",
                        "interval end_time precedes start_time",
                    ));
                }
            }
            TimingRule::MealRelative { .. } | TimingRule::SleepRelative { .. } => {}
        }

        Ok(())
    }

    /// Whether this schedule covers the given date
    pub fn covers(&self, date: NaiveDate) -> bool {
        if date < self.start_date {
            return false;
        }
        match self.end_date {
            Some(end) => date <= end,
            None => true,
        }
    }
}

// ============================================================================
// Dose Event Types
// ============================================================================

/// Lifecycle status of a dose event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Scheduled,
    Taken,
    Missed,
    Skipped,
    /// Scheduled-with-provenance: a dose pushed forward by snooze.
    /// Behaves as `Scheduled` for every lifecycle operation.
    Snoozed,
}

impl DoseStatus {
    /// Terminal states form the permanent adherence record
    pub fn is_terminal(&self) -> bool {
        matches!(self, DoseStatus::Taken | DoseStatus::Skipped)
    }

    /// States from which the dose is still awaiting action
    pub fn is_pending(&self) -> bool {
        matches!(self, DoseStatus::Scheduled | DoseStatus::Snoozed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Scheduled => "scheduled",
            DoseStatus::Taken => "taken",
            DoseStatus::Missed => "missed",
            DoseStatus::Skipped => "skipped",
            DoseStatus::Snoozed => "snoozed",
        }
    }
}

/// Enumerated reasons for skipping a dose
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Forgot,
    FeltSick,
    RanOut,
    SideEffects,
    Other,
}

/// How close a taken dose was to its scheduled time
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimingCategory {
    Early,
    OnTime,
    Late,
    VeryLate,
}

/// Adherence outcome committed alongside a take transition
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AdherenceOutcome {
    /// 0.0–1.0, monotonically decreasing with lateness
    pub score: f64,
    pub category: TimingCategory,
}

/// One concrete, time-stamped occurrence of a medication being due
///
/// Created by schedule materialization, transitioned exclusively by the
/// lifecycle engine, never hard-deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    /// Idempotency/undo key of the command that last transitioned this event
    pub command_id: Option<Uuid>,
    pub schedule_id: Uuid,
    pub medication_id: Uuid,
    pub patient_id: String,
    pub scheduled_date_time: DateTime<Utc>,
    pub dosage_amount: String,
    pub instructions: Option<String>,
    pub status: DoseStatus,
    /// True when the resolved time was a flexible fallback, not an anchor
    pub approximate: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub adherence: Option<AdherenceOutcome>,
    pub skip_reason: Option<SkipReason>,
    pub skip_notes: Option<String>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub undo_available_until: Option<DateTime<Utc>>,
}

impl DoseEvent {
    /// Natural key used for idempotent materialization
    pub fn natural_key(&self) -> (Uuid, DateTime<Utc>) {
        (self.medication_id, self.scheduled_date_time)
    }
}

/// Scope of a reschedule operation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleScope {
    /// Only the named event
    Single,
    /// The named event and every later pending event of its schedule
    Future,
    /// Every non-terminal event of the schedule, past and future
    All,
}

// ============================================================================
// Safety Types
// ============================================================================

/// Alert severity, ordered so `Critical` ranks highest
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Minor,
    Moderate,
    Major,
    Critical,
}

/// Category of safety finding
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Interaction,
    Allergy,
    Contraindication,
    Timing,
    Duplicate,
}

/// A ranked hazard finding from the safety rule engine
///
/// Derived on demand from the active medication set; has no lifecycle
/// of its own and is never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub medications: Vec<String>,
    pub recommendations: Vec<String>,
    pub source: String,
}

/// Severity of a recorded allergy
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllergySeverity {
    Mild,
    Moderate,
    Severe,
    Anaphylaxis,
}

/// One allergy entry in a patient's safety profile
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllergyEntry {
    pub allergen: String,
    pub severity: AllergySeverity,
}

/// Patient allergy/contraindication facts consumed by the rule engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatientSafetyProfile {
    pub patient_id: String,
    pub allergies: Vec<AllergyEntry>,
    pub contraindications: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_schedule(interval_hours: u8, max_doses: u8) -> MedicationSchedule {
        MedicationSchedule {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            patient_id: "p1".into(),
            timing: TimingRule::Interval {
                interval_hours,
                start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                avoid_sleep_hours: false,
                max_doses_per_day: max_doses,
            },
            dosage_amount: "1 tablet".into(),
            instructions: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            is_indefinite: true,
            reminder_minutes_before: vec![10],
            is_active: true,
        }
    }

    #[test]
    fn test_interval_bounds_validated() {
        assert!(interval_schedule(8, 3).validate().is_ok());
        assert!(interval_schedule(0, 3).validate().is_err());
        assert!(interval_schedule(25, 3).validate().is_err());
        assert!(interval_schedule(8, 0).validate().is_err());
        assert!(interval_schedule(8, 13).validate().is_err());
    }

    #[test]
    fn test_end_date_indefinite_exclusive() {
        let mut schedule = interval_schedule(8, 3);
        schedule.end_date = Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        // Both set → rejected
        assert!(schedule.validate().is_err());

        schedule.is_indefinite = false;
        assert!(schedule.validate().is_ok());

        // Neither set → rejected
        schedule.end_date = None;
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_covers_date_range() {
        let mut schedule = interval_schedule(8, 3);
        schedule.is_indefinite = false;
        schedule.end_date = Some(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());

        assert!(!schedule.covers(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));
        assert!(schedule.covers(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(schedule.covers(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert!(!schedule.covers(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn test_severity_total_order() {
        assert!(AlertSeverity::Critical > AlertSeverity::Major);
        assert!(AlertSeverity::Major > AlertSeverity::Moderate);
        assert!(AlertSeverity::Moderate > AlertSeverity::Minor);
    }

    #[test]
    fn test_timing_rule_serde_tag() {
        let rule = TimingRule::MealRelative {
            meal_type: MealType::Breakfast,
            offset_minutes: -15,
            is_flexible: true,
            fallback_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"timing_type\":\"meal_relative\""));
        let parsed: TimingRule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);
    }
}
