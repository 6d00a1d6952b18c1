use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use dosewise_core::*;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dosewise")]
#[command(about = "Medication dose scheduling and safety engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve schedules into concrete dose events for a date window
    Materialize {
        /// First date to materialize (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of days to materialize
        #[arg(long, default_value_t = 1)]
        days: u32,
    },

    /// List a day's dose events
    Due {
        /// Date to list (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Patient to list (default: taken from the medication directory)
        #[arg(long)]
        patient: Option<String>,
    },

    /// Mark a dose taken
    Take {
        /// Dose event id
        event: Uuid,

        /// Idempotency key; retries with the same id are safe
        #[arg(long)]
        command: Option<Uuid>,

        /// Time taken (RFC 3339, default now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Reverse a take within its undo window
    Undo {
        /// Dose event id
        event: Uuid,

        /// Idempotency key; retries with the same id are safe
        #[arg(long)]
        command: Option<Uuid>,

        /// Optional reason recorded in the journal
        #[arg(long)]
        reason: Option<String>,
    },

    /// Skip a dose
    Skip {
        /// Dose event id
        event: Uuid,

        /// Reason (forgot, felt_sick, ran_out, side_effects, other)
        #[arg(long)]
        reason: String,

        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Push a pending dose forward
    Snooze {
        /// Dose event id
        event: Uuid,

        /// Idempotency key; retries with the same id are safe
        #[arg(long)]
        command: Option<Uuid>,

        /// Minutes to push the dose forward
        #[arg(long)]
        minutes: i64,

        /// Optional reason recorded in the journal
        #[arg(long)]
        reason: Option<String>,
    },

    /// Move a schedule's doses to a new time
    Reschedule {
        /// Anchor dose event id
        event: Uuid,

        /// New scheduled time for the anchor event (RFC 3339)
        #[arg(long)]
        at: DateTime<Utc>,

        /// Scope (single, future, all)
        #[arg(long, default_value = "single")]
        scope: String,

        /// Optional reason recorded in the journal
        #[arg(long)]
        reason: Option<String>,
    },

    /// Confirm elapsed undo windows and mark overdue doses missed
    Sweep,

    /// Evaluate the active medication set against the safety rulebook
    Safety,

    /// Roll up journal transitions to CSV
    Rollup {
        /// Clean up processed journal files after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

fn main() -> Result<()> {
    dosewise_core::logging::init();

    let cli = Cli::parse();

    let config = EngineConfig::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Commands::Materialize { date, days } => {
            cmd_materialize(&data_dir, date.unwrap_or_else(today), days)
        }
        Commands::Due { date, patient } => {
            cmd_due(&data_dir, date.unwrap_or_else(today), patient)
        }
        Commands::Take { event, command, at } => cmd_take(
            &data_dir,
            &config,
            event,
            command.unwrap_or_else(Uuid::new_v4),
            at.unwrap_or_else(Utc::now),
        ),
        Commands::Undo {
            event,
            command,
            reason,
        } => cmd_undo(
            &data_dir,
            &config,
            event,
            command.unwrap_or_else(Uuid::new_v4),
            reason,
        ),
        Commands::Skip {
            event,
            reason,
            notes,
        } => cmd_skip(&data_dir, &config, event, &reason, notes),
        Commands::Snooze {
            event,
            command,
            minutes,
            reason,
        } => cmd_snooze(
            &data_dir,
            &config,
            event,
            command.unwrap_or_else(Uuid::new_v4),
            minutes,
            reason,
        ),
        Commands::Reschedule {
            event,
            at,
            scope,
            reason,
        } => cmd_reschedule(&data_dir, &config, event, at, &scope, reason),
        Commands::Sweep => cmd_sweep(&data_dir, &config),
        Commands::Safety => cmd_safety(&data_dir),
        Commands::Rollup { cleanup } => cmd_rollup(&data_dir, cleanup),
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================================================
// Paths and fixtures
// ============================================================================

fn events_path(data_dir: &Path) -> PathBuf {
    data_dir.join("events.json")
}

fn ledger_path(data_dir: &Path) -> PathBuf {
    data_dir.join("ledger.json")
}

fn journal_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("journal")
}

fn journal_path(data_dir: &Path) -> PathBuf {
    journal_dir(data_dir).join("transitions.jsonl")
}

fn csv_path(data_dir: &Path) -> PathBuf {
    data_dir.join("adherence.csv")
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path, what: &'static str) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|_| Error::NotFound {
        kind: what,
        id: path.display().to_string(),
    })?;
    Ok(serde_json::from_str(&contents)?)
}

fn load_medications(data_dir: &Path) -> Result<Vec<Medication>> {
    load_json(&data_dir.join("medications.json"), "medication directory")
}

fn load_schedules(data_dir: &Path) -> Result<Vec<MedicationSchedule>> {
    load_json(&data_dir.join("schedules.json"), "schedule file")
}

fn load_prefs(data_dir: &Path) -> Result<PatientTimePreferences> {
    PatientTimePreferences::load(&data_dir.join("prefs.json"))
}

fn load_safety_profile(data_dir: &Path) -> Result<Option<PatientSafetyProfile>> {
    let path = data_dir.join("safety_profile.json");
    if !path.exists() {
        return Ok(None);
    }
    load_json(&path, "safety profile").map(Some).map_err(|e| {
        Error::UpstreamUnavailable(format!("safety profile unreadable: {}", e))
    })
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_materialize(data_dir: &Path, start: NaiveDate, days: u32) -> Result<()> {
    if days == 0 {
        return Err(Error::validation("days", "days must be at least 1"));
    }

    std::fs::create_dir_all(data_dir)?;

    let medications = load_medications(data_dir)?;
    let schedules = load_schedules(data_dir)?;
    let prefs = load_prefs(data_dir)?;
    let mut store = DoseEventStore::load(&events_path(data_dir))?;

    let mut created = 0;
    for offset in 0..days {
        let date = start + Duration::days(i64::from(offset));
        for schedule in schedules.iter().filter(|s| s.is_active) {
            let Some(medication) = medications
                .iter()
                .find(|m| m.id == schedule.medication_id && m.is_active)
            else {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    "Schedule has no active medication, skipping"
                );
                continue;
            };

            let resolved = resolve(schedule, &prefs, date)?;
            created += store.materialize(schedule, medication, &resolved, date);
        }
    }

    store.save(&events_path(data_dir))?;

    println!("✓ Materialized {} dose events", created);
    println!(
        "  Window: {} to {} ({} day{})",
        start,
        start + Duration::days(i64::from(days) - 1),
        days,
        if days == 1 { "" } else { "s" }
    );
    Ok(())
}

fn cmd_due(data_dir: &Path, date: NaiveDate, patient: Option<String>) -> Result<()> {
    let store = DoseEventStore::load(&events_path(data_dir))?;
    let medications = load_medications(data_dir)?;

    let patient = match patient {
        Some(p) => p,
        None => medications
            .first()
            .map(|m| m.patient_id.clone())
            .ok_or(Error::NotFound {
                kind: "patient",
                id: "medication directory is empty".into(),
            })?,
    };

    let events = store.events_for_day(&patient, date);
    if events.is_empty() {
        println!("No doses scheduled for {} on {}", patient, date);
        return Ok(());
    }

    println!("Doses for {} on {}:", patient, date);
    for event in events {
        let name = medications
            .iter()
            .find(|m| m.id == event.medication_id)
            .map(|m| m.name.as_str())
            .unwrap_or("(unknown medication)");
        let marker = if event.approximate { "~" } else { " " };
        println!(
            "  {}  {}{}  {:<9}  {}  {}",
            event.id,
            marker,
            event.scheduled_date_time.format("%H:%M"),
            event.status.as_str(),
            name,
            event.dosage_amount,
        );
    }
    Ok(())
}

fn cmd_take(
    data_dir: &Path,
    config: &EngineConfig,
    event_id: Uuid,
    command_id: Uuid,
    taken_at: DateTime<Utc>,
) -> Result<()> {
    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut ledger = AdherenceLedger::load(&ledger_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    if ledger.patient_id.is_empty() {
        ledger.patient_id = store.fetch(event_id)?.patient_id.clone();
    }

    let outcome = engine.take(
        &mut store,
        &mut ledger,
        &mut journal,
        command_id,
        event_id,
        taken_at,
    )?;

    store.save(&events_path(data_dir))?;
    ledger.save(&ledger_path(data_dir))?;

    if outcome.already_applied {
        println!("✓ Dose already taken (retry, no changes)");
    } else {
        println!("✓ Dose taken");
    }
    println!(
        "  Timing: {:?} (score {:.2})",
        outcome.adherence.category, outcome.adherence.score
    );
    println!("  Streak: {} day(s)", outcome.streak_days);
    for milestone in &outcome.milestones {
        println!("  ★ {}-day streak milestone reached!", milestone);
    }
    if let Some(until) = outcome.event.undo_available_until {
        println!("  Undo available until {}", until.format("%H:%M:%S"));
    }
    Ok(())
}

fn cmd_undo(
    data_dir: &Path,
    config: &EngineConfig,
    event_id: Uuid,
    command_id: Uuid,
    reason: Option<String>,
) -> Result<()> {
    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut ledger = AdherenceLedger::load(&ledger_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    let event = engine.undo(
        &mut store,
        &mut ledger,
        &mut journal,
        command_id,
        event_id,
        reason,
        Utc::now(),
    )?;

    store.save(&events_path(data_dir))?;
    ledger.save(&ledger_path(data_dir))?;

    println!("✓ Take undone, dose back to {}", event.status.as_str());
    println!("  Streak: {} day(s)", ledger.current_streak());
    Ok(())
}

fn cmd_skip(
    data_dir: &Path,
    config: &EngineConfig,
    event_id: Uuid,
    reason: &str,
    notes: Option<String>,
) -> Result<()> {
    let reason = parse_skip_reason(reason)?;

    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    let event = engine.skip(&mut store, &mut journal, event_id, reason, notes, Utc::now())?;

    store.save(&events_path(data_dir))?;

    println!("✓ Dose skipped ({:?})", reason);
    if let Some(notes) = &event.skip_notes {
        println!("  Notes: {}", notes);
    }
    Ok(())
}

fn cmd_snooze(
    data_dir: &Path,
    config: &EngineConfig,
    event_id: Uuid,
    command_id: Uuid,
    minutes: i64,
    reason: Option<String>,
) -> Result<()> {
    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    let event = engine.snooze(
        &mut store,
        &mut journal,
        command_id,
        event_id,
        minutes,
        reason,
        Utc::now(),
    )?;

    store.save(&events_path(data_dir))?;

    println!(
        "✓ Dose snoozed {} minutes, now due at {}",
        minutes,
        event.scheduled_date_time.format("%H:%M")
    );
    Ok(())
}

fn cmd_reschedule(
    data_dir: &Path,
    config: &EngineConfig,
    event_id: Uuid,
    new_time: DateTime<Utc>,
    scope: &str,
    reason: Option<String>,
) -> Result<()> {
    let scope = parse_scope(scope)?;

    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    let affected = engine.reschedule(
        &mut store,
        &mut journal,
        event_id,
        new_time,
        reason,
        scope,
        Utc::now(),
    )?;

    store.save(&events_path(data_dir))?;

    println!("✓ Rescheduled {} dose event(s) ({:?} scope)", affected.len(), scope);
    Ok(())
}

fn cmd_sweep(data_dir: &Path, config: &EngineConfig) -> Result<()> {
    let mut store = DoseEventStore::load(&events_path(data_dir))?;
    let mut journal = JsonlJournal::new(journal_path(data_dir));
    let notifier = LogNotifier;
    let engine = LifecycleEngine::new(config, &notifier);

    let outcome = engine.sweep(&mut store, &mut journal, Utc::now())?;

    store.save(&events_path(data_dir))?;

    println!(
        "✓ Sweep complete: {} confirmed, {} missed",
        outcome.confirmed, outcome.missed
    );
    Ok(())
}

fn cmd_safety(data_dir: &Path) -> Result<()> {
    let medications = load_medications(data_dir)?;

    // A broken profile degrades the evaluation, it does not block it
    let profile = match load_safety_profile(data_dir) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!("{}", e);
            eprintln!("⚠ {}; allergy and contraindication checks skipped", e);
            None
        }
    };

    let rulebook = get_default_rulebook();
    let errors = rulebook.validate();
    if !errors.is_empty() {
        eprintln!("Rulebook validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Config("Invalid rulebook".into()));
    }

    let alerts = evaluate(rulebook, &medications, profile.as_ref());

    if alerts.is_empty() {
        println!("✓ No safety alerts for the active medication set");
        return Ok(());
    }

    println!("{} safety alert(s):", alerts.len());
    for alert in &alerts {
        display_alert(alert);
    }
    Ok(())
}

fn cmd_rollup(data_dir: &Path, cleanup: bool) -> Result<()> {
    let journal_path = journal_path(data_dir);

    if !journal_path.exists() {
        println!("No journal file found - nothing to roll up.");
        return Ok(());
    }

    let count = export::journal_to_csv_and_archive(&journal_path, &csv_path(data_dir))?;

    println!("✓ Rolled up {} transitions to CSV", count);
    println!("  CSV: {}", csv_path(data_dir).display());

    if cleanup {
        let cleaned = export::cleanup_processed_journals(&journal_dir(data_dir))?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed journal files", cleaned);
        }
    }

    Ok(())
}

// ============================================================================
// Display and parsing helpers
// ============================================================================

fn display_alert(alert: &SafetyAlert) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {:?} — {:?}", alert.severity, alert.alert_type);
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  {}", alert.title);
    println!("  {}", alert.description);
    println!("  Medications: {}", alert.medications.join(", "));
    for recommendation in &alert.recommendations {
        println!("  → {}", recommendation);
    }
    println!();
}

fn parse_skip_reason(reason: &str) -> Result<SkipReason> {
    match reason.to_lowercase().as_str() {
        "forgot" => Ok(SkipReason::Forgot),
        "felt_sick" => Ok(SkipReason::FeltSick),
        "ran_out" => Ok(SkipReason::RanOut),
        "side_effects" => Ok(SkipReason::SideEffects),
        "other" => Ok(SkipReason::Other),
        other => Err(Error::validation(
            "reason",
            format!(
                "unknown skip reason '{}' (expected forgot, felt_sick, ran_out, side_effects, other)",
                other
            ),
        )),
    }
}

fn parse_scope(scope: &str) -> Result<RescheduleScope> {
    match scope.to_lowercase().as_str() {
        "single" => Ok(RescheduleScope::Single),
        "future" => Ok(RescheduleScope::Future),
        "all" => Ok(RescheduleScope::All),
        other => Err(Error::validation(
            "scope",
            format!("unknown scope '{}' (expected single, future, all)", other),
        )),
    }
}
