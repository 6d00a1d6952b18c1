#![forbid(unsafe_code)]

//! Core domain model and business logic for the Dosewise medication engine.
//!
//! This crate provides:
//! - Domain types (medications, schedules, dose events, alerts)
//! - Schedule resolution (timing rules → concrete dose times)
//! - Dose lifecycle state machine (take/undo/skip/snooze/reschedule)
//! - Safety rule evaluation (interactions, duplicates, allergies)
//! - Adherence/streak tracking
//! - Persistence (state snapshots, transition journal, CSV rollup)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod prefs;
pub mod resolver;
pub mod store;
pub mod adherence;
pub mod lifecycle;
pub mod rulebook;
pub mod safety;
pub mod journal;
pub mod export;
pub mod notify;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::EngineConfig;
pub use resolver::{resolve, ResolvedDose};
pub use store::DoseEventStore;
pub use adherence::AdherenceLedger;
pub use lifecycle::{LifecycleEngine, SweepOutcome, TakeOutcome};
pub use prefs::{Lifestyle, MealTimes, PatientTimePreferences, TimeBucket, TimeRange};
pub use rulebook::{build_default_rulebook, get_default_rulebook, Rulebook};
pub use safety::evaluate;
pub use journal::{JsonlJournal, TransitionSink};
pub use notify::{LogNotifier, Notification, Notifier};
