//! Dose lifecycle state machine.
//!
//! Transitions: scheduled → taken (undoable until the window elapses,
//! then confirmed), scheduled → skipped, scheduled → missed (grace
//! period, sweep-driven), taken → scheduled via undo, snooze and
//! reschedule move pending doses in place.
//!
//! Every operation is keyed by `command_id`/`event_id` and safe to
//! retry: an operation already applied returns the prior result
//! instead of erroring, except undo past its window, which is a hard
//! failure. A transition and its adherence side effects commit as one
//! atomic unit; if the journal write fails, neither lands.
//!
//! The undo-window expiry and the missed check live in `sweep`, which
//! owns time — a client countdown is cosmetic and never authoritative.

use crate::journal::{TransitionRecord, TransitionSink};
use crate::{
    adherence, AdherenceLedger, AdherenceOutcome, DoseEvent, DoseEventStore, DoseStatus,
    EngineConfig, Error, Notification, Notifier, RescheduleScope, Result, SkipReason,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Result of a take operation
#[derive(Clone, Debug)]
pub struct TakeOutcome {
    pub event: DoseEvent,
    pub adherence: AdherenceOutcome,
    pub streak_days: u32,
    /// Streak milestones crossed by this take, ascending
    pub milestones: Vec<u32>,
    /// True when this was an idempotent retry of a committed take
    pub already_applied: bool,
}

/// Counts from one authoritative sweep pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Takes whose undo window elapsed and are now final
    pub confirmed: usize,
    /// Pending doses past their grace period, now missed
    pub missed: usize,
}

/// The dose lifecycle engine
///
/// Holds the immutable configuration and the notification seam; all
/// mutable state lives in the store and ledger passed to each call, so
/// callers control locking granularity.
pub struct LifecycleEngine<'a> {
    config: &'a EngineConfig,
    notifier: &'a dyn Notifier,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(config: &'a EngineConfig, notifier: &'a dyn Notifier) -> Self {
        Self { config, notifier }
    }

    fn undo_window(&self) -> Option<Duration> {
        let seconds = self.config.lifecycle.undo_window_seconds;
        (seconds > 0).then(|| Duration::seconds(seconds))
    }

    fn grace(&self) -> Duration {
        Duration::minutes(self.config.lifecycle.missed_grace_minutes)
    }

    /// Mark a dose taken
    ///
    /// Computes the adherence outcome, credits the streak ledger, and
    /// opens the undo window. Retrying with the same `command_id`
    /// returns the committed result without reapplying side effects.
    pub fn take(
        &self,
        store: &mut DoseEventStore,
        ledger: &mut AdherenceLedger,
        journal: &mut dyn TransitionSink,
        command_id: Uuid,
        event_id: Uuid,
        taken_at: DateTime<Utc>,
    ) -> Result<TakeOutcome> {
        let before = store.fetch(event_id)?.clone();

        if before.status == DoseStatus::Taken {
            if before.command_id == Some(command_id) {
                let adherence = before.adherence.ok_or_else(|| {
                    Error::Other(format!("taken event {} has no adherence outcome", event_id))
                })?;
                tracing::debug!(%event_id, %command_id, "Take retry, returning prior result");
                return Ok(TakeOutcome {
                    event: before,
                    adherence,
                    streak_days: ledger.current_streak(),
                    milestones: Vec::new(),
                    already_applied: true,
                });
            }
            return Err(self.invalid_state("take", &before));
        }

        if !before.status.is_pending() {
            return Err(self.invalid_state("take", &before));
        }

        let adherence = adherence::score_take(
            &self.config.adherence,
            before.scheduled_date_time,
            taken_at,
        );

        let mut after = before.clone();
        after.status = DoseStatus::Taken;
        after.command_id = Some(command_id);
        after.taken_at = Some(taken_at);
        after.adherence = Some(adherence);
        after.undo_available_until = self.undo_window().map(|w| taken_at + w);

        // Side effects are computed on a scratch ledger and only adopted
        // once the journal accepts the transition, so an interrupted
        // take leaves no partial adherence behind.
        let mut next_ledger = ledger.clone();
        let credit = next_ledger.apply_take(
            &self.config.adherence,
            event_id,
            before.scheduled_date_time.date_naive(),
            adherence.category,
        );

        journal.append(&TransitionRecord::for_transition(
            "take", taken_at, &before, &after, None,
        ))?;

        *ledger = next_ledger;
        store.commit(after.clone());

        self.notifier.dispatch(&Notification {
            patient_id: after.patient_id.clone(),
            medication_id: after.medication_id,
            event_id,
            status: DoseStatus::Taken,
            scheduled_date_time: after.scheduled_date_time,
            message: format!("Dose taken ({:?})", adherence.category),
        });

        tracing::info!(
            %event_id,
            category = ?adherence.category,
            score = adherence.score,
            streak = credit.streak_days,
            "Dose taken"
        );

        Ok(TakeOutcome {
            event: after,
            adherence,
            streak_days: credit.streak_days,
            milestones: credit.milestones,
            already_applied: false,
        })
    }

    /// Reverse a take within its undo window
    ///
    /// Restores the dose to scheduled, clears the adherence outcome,
    /// and reverses any streak credit and milestones the take earned.
    /// Past the window this is a hard failure reporting elapsed versus
    /// allowed time.
    pub fn undo(
        &self,
        store: &mut DoseEventStore,
        ledger: &mut AdherenceLedger,
        journal: &mut dyn TransitionSink,
        command_id: Uuid,
        event_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DoseEvent> {
        let before = store.fetch(event_id)?.clone();

        // Retried undo: the revert already committed under this command
        if before.status.is_pending() && before.command_id == Some(command_id) {
            tracing::debug!(%event_id, %command_id, "Undo retry, returning prior result");
            return Ok(before);
        }

        if before.status != DoseStatus::Taken {
            return Err(self.invalid_state("undo", &before));
        }

        let taken_at = before.taken_at.ok_or_else(|| {
            Error::Other(format!("taken event {} has no taken_at", event_id))
        })?;
        let allowed = self.config.lifecycle.undo_window_seconds;
        let expired = match before.undo_available_until {
            Some(until) => now > until,
            // Confirmed by the sweep, or undo disabled outright
            None => true,
        };
        if expired {
            return Err(Error::UndoWindowExpired {
                elapsed_seconds: (now - taken_at).num_seconds(),
                allowed_seconds: allowed,
            });
        }

        let mut after = before.clone();
        after.status = DoseStatus::Scheduled;
        after.command_id = Some(command_id);
        after.taken_at = None;
        after.adherence = None;
        after.undo_available_until = None;

        let mut next_ledger = ledger.clone();
        next_ledger.reverse_take(event_id);

        journal.append(&TransitionRecord::for_transition(
            "undo", now, &before, &after, reason,
        ))?;

        *ledger = next_ledger;
        store.commit(after.clone());

        tracing::info!(%event_id, "Take undone, dose back to scheduled");
        Ok(after)
    }

    /// Skip a dose (terminal)
    ///
    /// Valid from scheduled/snoozed or missed. Notes are accepted as
    /// free text for any reason; requiring them for `Other` is a UI
    /// concern.
    pub fn skip(
        &self,
        store: &mut DoseEventStore,
        journal: &mut dyn TransitionSink,
        event_id: Uuid,
        reason: SkipReason,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DoseEvent> {
        let before = store.fetch(event_id)?.clone();

        if before.status == DoseStatus::Skipped {
            tracing::debug!(%event_id, "Skip retry, returning prior result");
            return Ok(before);
        }

        if !before.status.is_pending() && before.status != DoseStatus::Missed {
            return Err(self.invalid_state("skip", &before));
        }

        let mut after = before.clone();
        after.status = DoseStatus::Skipped;
        after.skip_reason = Some(reason);
        after.skip_notes = notes;

        journal.append(&TransitionRecord::for_transition(
            "skip",
            now,
            &before,
            &after,
            Some(format!("{:?}", reason).to_lowercase()),
        ))?;

        store.commit(after.clone());

        self.notifier.dispatch(&Notification {
            patient_id: after.patient_id.clone(),
            medication_id: after.medication_id,
            event_id,
            status: DoseStatus::Skipped,
            scheduled_date_time: after.scheduled_date_time,
            message: format!("Dose skipped ({:?})", reason),
        });

        tracing::info!(%event_id, ?reason, "Dose skipped");
        Ok(after)
    }

    /// Push a pending dose forward by `minutes`
    ///
    /// The original slot is not duplicated: the event's scheduled time
    /// advances in place and the dose stays pending. The journal entry
    /// preserves the original slot for audit. Retrying with the same
    /// `command_id` returns the committed result without advancing the
    /// dose a second time.
    pub fn snooze(
        &self,
        store: &mut DoseEventStore,
        journal: &mut dyn TransitionSink,
        command_id: Uuid,
        event_id: Uuid,
        minutes: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DoseEvent> {
        if minutes <= 0 {
            return Err(Error::validation("minutes", "snooze minutes must be positive"));
        }

        let before = store.fetch(event_id)?.clone();

        // Retried snooze: the advance already committed under this command
        if before.status == DoseStatus::Snoozed && before.command_id == Some(command_id) {
            tracing::debug!(%event_id, %command_id, "Snooze retry, returning prior result");
            return Ok(before);
        }

        if !before.status.is_pending() {
            return Err(self.invalid_state("snooze", &before));
        }

        let new_time = before.scheduled_date_time + Duration::minutes(minutes);
        let mut after = before.clone();
        after.status = DoseStatus::Snoozed;
        after.command_id = Some(command_id);
        after.scheduled_date_time = new_time;
        after.snoozed_until = Some(new_time);

        journal.append(&TransitionRecord::for_transition(
            "snooze",
            now,
            &before,
            &after,
            reason.or_else(|| Some(format!("snoozed {} minutes", minutes))),
        ))?;

        store.unindex(before.natural_key());
        store.commit(after.clone());

        tracing::info!(%event_id, minutes, "Dose snoozed to {}", new_time);
        Ok(after)
    }

    /// Move one or more of a schedule's doses to align with a new time
    ///
    /// `Single` moves the named event. `Future` also shifts every later
    /// pending dose of the same schedule by the same delta; `All`
    /// shifts every non-terminal dose, past and future. Taken and
    /// skipped events are never touched. Returns the affected ids.
    pub fn reschedule(
        &self,
        store: &mut DoseEventStore,
        journal: &mut dyn TransitionSink,
        event_id: Uuid,
        new_time: DateTime<Utc>,
        reason: Option<String>,
        scope: RescheduleScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let anchor = store.fetch(event_id)?.clone();
        if anchor.status.is_terminal() {
            return Err(self.invalid_state("reschedule", &anchor));
        }

        let delta = new_time - anchor.scheduled_date_time;
        if delta.is_zero() {
            return Ok(vec![event_id]);
        }

        let targets: Vec<DoseEvent> = match scope {
            RescheduleScope::Single => vec![anchor.clone()],
            RescheduleScope::Future => store
                .events_for_schedule(anchor.schedule_id)
                .into_iter()
                .filter(|e| {
                    !e.status.is_terminal()
                        && e.scheduled_date_time >= anchor.scheduled_date_time
                })
                .cloned()
                .collect(),
            RescheduleScope::All => store
                .events_for_schedule(anchor.schedule_id)
                .into_iter()
                .filter(|e| !e.status.is_terminal())
                .cloned()
                .collect(),
        };

        let detail = reason.unwrap_or_else(|| format!("rescheduled ({:?} scope)", scope));
        let mut affected = Vec::with_capacity(targets.len());

        for before in targets {
            let mut after = before.clone();
            after.scheduled_date_time = before.scheduled_date_time + delta;
            // A missed dose moved to a new slot is pending again
            if after.status == DoseStatus::Missed {
                after.status = DoseStatus::Scheduled;
            }

            journal.append(&TransitionRecord::for_transition(
                "reschedule",
                now,
                &before,
                &after,
                Some(detail.clone()),
            ))?;

            store.unindex(before.natural_key());
            affected.push(after.id);
            store.commit(after);
        }

        tracing::info!(
            %event_id,
            ?scope,
            moved = affected.len(),
            "Rescheduled dose events"
        );
        Ok(affected)
    }

    /// Mark one pending dose missed once its grace period has elapsed
    ///
    /// Idempotent: terminal and already-missed events are a no-op, and
    /// a dose still within grace is left pending.
    pub fn mark_missed(
        &self,
        store: &mut DoseEventStore,
        journal: &mut dyn TransitionSink,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DoseEvent> {
        let before = store.fetch(event_id)?.clone();

        if !before.status.is_pending() {
            return Ok(before);
        }
        if now < before.scheduled_date_time + self.grace() {
            tracing::debug!(%event_id, "Grace period still open, not missed yet");
            return Ok(before);
        }

        let mut after = before.clone();
        after.status = DoseStatus::Missed;

        journal.append(&TransitionRecord::for_transition(
            "missed", now, &before, &after, None,
        ))?;

        store.commit(after.clone());

        self.notifier.dispatch(&Notification {
            patient_id: after.patient_id.clone(),
            medication_id: after.medication_id,
            event_id,
            status: DoseStatus::Missed,
            scheduled_date_time: after.scheduled_date_time,
            message: "Dose missed".into(),
        });

        tracing::info!(%event_id, "Dose marked missed");
        Ok(after)
    }

    /// The authoritative time-driven pass
    ///
    /// Finalizes takes whose undo window has elapsed (the confirm
    /// transition happens here, with no client interaction) and marks
    /// pending doses missed once past grace. Run from a background
    /// timer, never from client polling.
    pub fn sweep(
        &self,
        store: &mut DoseEventStore,
        journal: &mut dyn TransitionSink,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        let to_confirm: Vec<Uuid> = store
            .iter()
            .filter(|e| {
                e.status == DoseStatus::Taken
                    && e.undo_available_until.is_some_and(|until| now > until)
            })
            .map(|e| e.id)
            .collect();

        for id in to_confirm {
            let before = store.fetch(id)?.clone();
            let mut after = before.clone();
            after.undo_available_until = None;

            journal.append(&TransitionRecord::for_transition(
                "confirm", now, &before, &after, None,
            ))?;
            store.commit(after);
            outcome.confirmed += 1;
        }

        let overdue: Vec<Uuid> = store
            .iter()
            .filter(|e| {
                e.status.is_pending() && now >= e.scheduled_date_time + self.grace()
            })
            .map(|e| e.id)
            .collect();

        for id in overdue {
            self.mark_missed(store, journal, id, now)?;
            outcome.missed += 1;
        }

        if outcome != SweepOutcome::default() {
            tracing::info!(
                confirmed = outcome.confirmed,
                missed = outcome.missed,
                "Sweep pass complete"
            );
        }

        Ok(outcome)
    }

    fn invalid_state(&self, operation: &'static str, event: &DoseEvent) -> Error {
        Error::InvalidState {
            operation,
            event_id: event.id,
            status: event.status.as_str().into(),
        }
    }
}
