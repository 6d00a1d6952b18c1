//! Schedule resolution: timing rules → concrete dose times for a date.
//!
//! `resolve` is a pure function of (schedule, preferences, date) and is
//! deterministic, which is what makes re-materialization idempotent.
//! All clock arithmetic wraps at 24:00; results are sorted ascending
//! and de-duplicated.

use crate::{MedicationSchedule, PatientTimePreferences, Result, SleepAnchor, TimingRule};
use chrono::{NaiveDate, NaiveTime, Timelike};

/// A single resolved dose time for one day
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedDose {
    pub time: NaiveTime,
    /// True when the time is a flexible fallback rather than a real anchor
    pub approximate: bool,
}

/// Resolve a schedule into its dose times for `date`
///
/// Outside the schedule's active date range this returns an empty list:
/// the caller should have deactivated an expired schedule, but the
/// resolver does not rely on it.
pub fn resolve(
    schedule: &MedicationSchedule,
    prefs: &PatientTimePreferences,
    date: NaiveDate,
) -> Result<Vec<ResolvedDose>> {
    schedule.validate()?;

    if !schedule.covers(date) {
        tracing::debug!(
            schedule_id = %schedule.id,
            %date,
            "Date outside schedule range, no doses resolved"
        );
        return Ok(Vec::new());
    }

    let mut doses = match &schedule.timing {
        TimingRule::Absolute { times } => times
            .iter()
            .map(|&time| ResolvedDose {
                time,
                approximate: false,
            })
            .collect(),

        TimingRule::MealRelative {
            meal_type,
            offset_minutes,
            is_flexible,
            fallback_time,
        } => {
            let resolved = match prefs.lifestyle.meal_times.get(*meal_type) {
                Some(meal_time) => ResolvedDose {
                    time: add_minutes(meal_time, *offset_minutes),
                    approximate: false,
                },
                None => {
                    tracing::debug!(
                        schedule_id = %schedule.id,
                        ?meal_type,
                        "Meal time unknown, falling back to {}",
                        fallback_time
                    );
                    ResolvedDose {
                        time: *fallback_time,
                        approximate: *is_flexible,
                    }
                }
            };
            vec![resolved]
        }

        TimingRule::SleepRelative {
            relative_to,
            offset_minutes,
            fallback_time,
        } => {
            let anchor = match relative_to {
                SleepAnchor::Bedtime => prefs.lifestyle.bed_time,
                SleepAnchor::WakeTime => prefs.lifestyle.wake_up_time,
            };
            let resolved = match anchor {
                Some(anchor_time) => ResolvedDose {
                    time: add_minutes(anchor_time, *offset_minutes),
                    approximate: false,
                },
                None => ResolvedDose {
                    time: *fallback_time,
                    approximate: false,
                },
            };
            vec![resolved]
        }

        TimingRule::Interval {
            interval_hours,
            start_time,
            end_time,
            avoid_sleep_hours,
            max_doses_per_day,
        } => generate_interval_times(
            prefs,
            *interval_hours,
            *start_time,
            *end_time,
            *avoid_sleep_hours,
            *max_doses_per_day,
        ),
    };

    // Overlapping times for the same medication+day collapse to one dose
    doses.sort_by_key(|d| d.time);
    doses.dedup_by_key(|d| d.time);

    tracing::debug!(
        schedule_id = %schedule.id,
        strategy = schedule.timing.kind(),
        count = doses.len(),
        "Resolved dose times"
    );

    Ok(doses)
}

/// Generate interval-strategy times within the daily window
///
/// Steps `interval_hours` from `start_time`, stops at or before
/// `end_time`, and never exceeds `max_doses_per_day` entries.
fn generate_interval_times(
    prefs: &PatientTimePreferences,
    interval_hours: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
    avoid_sleep_hours: bool,
    max_doses_per_day: u8,
) -> Vec<ResolvedDose> {
    let start_min = minutes_of(start_time);
    let end_min = minutes_of(end_time);
    let step = i64::from(interval_hours) * 60;

    let mut generated = Vec::new();
    let mut m = i64::from(start_min);
    while generated.len() < usize::from(max_doses_per_day) && m <= i64::from(end_min) {
        generated.push(ResolvedDose {
            time: time_from_minutes(m as u32),
            approximate: false,
        });
        m += step;
    }

    if !avoid_sleep_hours {
        return generated;
    }

    let (bed, wake) = match (prefs.lifestyle.bed_time, prefs.lifestyle.wake_up_time) {
        (Some(b), Some(w)) => (b, w),
        // Without both anchors there is no sleep window to avoid
        _ => return generated,
    };

    let awake: Vec<ResolvedDose> = generated
        .iter()
        .copied()
        .filter(|d| !in_sleep_window(d.time, bed, wake))
        .collect();

    if awake.is_empty() {
        // Dropping every slot would leave the patient with no dose;
        // keep the single generated time nearest start_time.
        let nearest = generated
            .iter()
            .copied()
            .min_by_key(|d| (i64::from(minutes_of(d.time)) - i64::from(start_min)).abs());
        return nearest.into_iter().collect();
    }

    awake
}

/// Whether `t` falls within [bed, wake), wrapping across midnight
fn in_sleep_window(t: NaiveTime, bed: NaiveTime, wake: NaiveTime) -> bool {
    if bed <= wake {
        t >= bed && t < wake
    } else {
        t >= bed || t < wake
    }
}

/// Add a signed minute offset to a clock time, wrapping at 24:00
pub(crate) fn add_minutes(t: NaiveTime, offset: i32) -> NaiveTime {
    let wrapped = (minutes_of(t) as i32 + offset).rem_euclid(24 * 60) as u32;
    time_from_minutes(wrapped)
}

fn minutes_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn time_from_minutes(m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(m / 60, m % 60, 0).expect("minutes wrapped within a day")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MealType, TimingRule};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule_with(timing: TimingRule) -> MedicationSchedule {
        MedicationSchedule {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            patient_id: "p1".into(),
            timing,
            dosage_amount: "1 tablet".into(),
            instructions: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            is_indefinite: true,
            reminder_minutes_before: vec![],
            is_active: true,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_absolute_times_verbatim_sorted_deduped() {
        let schedule = schedule_with(TimingRule::Absolute {
            times: vec![t(20, 0), t(8, 0), t(8, 0)],
        });
        let prefs = PatientTimePreferences::default();

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        let times: Vec<_> = doses.iter().map(|d| d.time).collect();
        assert_eq!(times, vec![t(8, 0), t(20, 0)]);
    }

    #[test]
    fn test_meal_relative_offset_before_breakfast() {
        let schedule = schedule_with(TimingRule::MealRelative {
            meal_type: MealType::Breakfast,
            offset_minutes: -15,
            is_flexible: false,
            fallback_time: t(9, 0),
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.meal_times.breakfast = Some(t(8, 0));

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].time, t(7, 45));
        assert!(!doses[0].approximate);
    }

    #[test]
    fn test_meal_relative_missing_meal_uses_flexible_fallback() {
        let schedule = schedule_with(TimingRule::MealRelative {
            meal_type: MealType::Dinner,
            offset_minutes: 30,
            is_flexible: true,
            fallback_time: t(19, 0),
        });
        let prefs = PatientTimePreferences::default(); // no meal times set

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses[0].time, t(19, 0));
        assert!(doses[0].approximate);
    }

    #[test]
    fn test_sleep_relative_before_bedtime() {
        let schedule = schedule_with(TimingRule::SleepRelative {
            relative_to: SleepAnchor::Bedtime,
            offset_minutes: -30,
            fallback_time: t(21, 0),
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.bed_time = Some(t(23, 0));

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses[0].time, t(22, 30));
    }

    #[test]
    fn test_sleep_relative_missing_anchor_uses_fallback() {
        let schedule = schedule_with(TimingRule::SleepRelative {
            relative_to: SleepAnchor::WakeTime,
            offset_minutes: 15,
            fallback_time: t(7, 30),
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.wake_up_time = None;

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses[0].time, t(7, 30));
    }

    #[test]
    fn test_offset_wraps_past_midnight() {
        let schedule = schedule_with(TimingRule::SleepRelative {
            relative_to: SleepAnchor::Bedtime,
            offset_minutes: 90,
            fallback_time: t(23, 0),
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.bed_time = Some(t(23, 0));

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses[0].time, t(0, 30));
    }

    #[test]
    fn test_interval_stops_at_end_time() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 8,
            start_time: t(7, 0),
            end_time: t(22, 0),
            avoid_sleep_hours: false,
            max_doses_per_day: 3,
        });
        let prefs = PatientTimePreferences::default();

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        let times: Vec<_> = doses.iter().map(|d| d.time).collect();
        // 23:00 would exceed end_time, so only two doses remain
        assert_eq!(times, vec![t(7, 0), t(15, 0)]);
    }

    #[test]
    fn test_interval_caps_at_max_doses() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 2,
            start_time: t(8, 0),
            end_time: t(22, 0),
            avoid_sleep_hours: false,
            max_doses_per_day: 4,
        });
        let prefs = PatientTimePreferences::default();

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(doses.len(), 4);
        // Monotonically increasing
        for pair in doses.windows(2) {
            assert!(pair[0].time < pair[1].time);
        }
    }

    #[test]
    fn test_interval_avoids_sleep_hours() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 6,
            start_time: t(6, 0),
            end_time: t(23, 59),
            avoid_sleep_hours: true,
            max_doses_per_day: 4,
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.bed_time = Some(t(22, 0));
        prefs.lifestyle.wake_up_time = Some(t(7, 0));

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        let times: Vec<_> = doses.iter().map(|d| d.time).collect();
        // 06:00 falls before wake and is dropped; 12:00 and 18:00 survive
        assert_eq!(times, vec![t(12, 0), t(18, 0)]);
    }

    #[test]
    fn test_interval_keeps_one_dose_when_all_asleep() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 1,
            start_time: t(1, 0),
            end_time: t(4, 0),
            avoid_sleep_hours: true,
            max_doses_per_day: 4,
        });
        let mut prefs = PatientTimePreferences::default();
        prefs.lifestyle.bed_time = Some(t(22, 0));
        prefs.lifestyle.wake_up_time = Some(t(7, 0));

        let doses = resolve(&schedule, &prefs, day()).unwrap();
        // All generated slots are in the sleep window; the one nearest
        // start_time is kept rather than yielding zero doses.
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].time, t(1, 0));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 4,
            start_time: t(8, 0),
            end_time: t(20, 0),
            avoid_sleep_hours: true,
            max_doses_per_day: 6,
        });
        let prefs = PatientTimePreferences::default();

        let first = resolve(&schedule, &prefs, day()).unwrap();
        let second = resolve(&schedule, &prefs, day()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_date_outside_range_resolves_empty() {
        let mut schedule = schedule_with(TimingRule::Absolute {
            times: vec![t(8, 0)],
        });
        schedule.is_indefinite = false;
        schedule.end_date = Some(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        let prefs = PatientTimePreferences::default();
        let doses = resolve(&schedule, &prefs, day()).unwrap();
        assert!(doses.is_empty());
    }

    #[test]
    fn test_invalid_payload_rejected_with_field() {
        let schedule = schedule_with(TimingRule::Interval {
            interval_hours: 30,
            start_time: t(7, 0),
            end_time: t(22, 0),
            avoid_sleep_hours: false,
            max_doses_per_day: 3,
        });
        let prefs = PatientTimePreferences::default();

        let err = resolve(&schedule, &prefs, day()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Validation { ref field, .. } if field == "interval_hours"
        ));
    }
}
