//! Safety rule engine: hazard evaluation over an active medication set.
//!
//! `evaluate` is pure and recomputed on every call; the only state is
//! the immutable rulebook. Alerts are ranked by severity, with ties in
//! detection order (interaction, duplicate, timing, allergy,
//! contraindication) so output is reproducible.

use crate::rulebook::Rulebook;
use crate::{
    AlertSeverity, AlertType, AllergySeverity, Medication, PatientSafetyProfile, SafetyAlert,
};
use uuid::Uuid;

/// Evaluate the active medication set against the rulebook
///
/// `profile` is optional: when the safety-profile provider is
/// unreachable the allergy and contraindication rules are skipped and
/// the medication-only rules still run, degrading rather than failing.
/// An empty medication list yields an empty alert list.
pub fn evaluate(
    rulebook: &Rulebook,
    medications: &[Medication],
    profile: Option<&PatientSafetyProfile>,
) -> Vec<SafetyAlert> {
    let active: Vec<&Medication> = medications.iter().filter(|m| m.is_active).collect();
    if active.is_empty() {
        return Vec::new();
    }

    let mut alerts = Vec::new();
    detect_interactions(rulebook, &active, &mut alerts);
    detect_duplicate_therapy(rulebook, &active, &mut alerts);
    detect_timing_separation(rulebook, &active, &mut alerts);

    match profile {
        Some(profile) => {
            detect_allergy_conflicts(&active, profile, &mut alerts);
            detect_contraindications(&active, profile, &mut alerts);
        }
        None => {
            tracing::warn!(
                "No safety profile available; allergy and contraindication rules skipped"
            );
        }
    }

    // Stable sort: ties keep detection order
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));

    tracing::debug!(
        medications = active.len(),
        alerts = alerts.len(),
        "Safety evaluation complete"
    );

    alerts
}

/// Case-insensitive substring match in either direction against any of
/// the medication's known names
fn matches_medication(medication: &Medication, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    medication.known_names().any(|name| {
        let name = name.to_lowercase();
        name.contains(&needle) || needle.contains(&name)
    })
}

/// Pairwise scan against the interaction table, one alert per pair
fn detect_interactions(
    rulebook: &Rulebook,
    medications: &[&Medication],
    alerts: &mut Vec<SafetyAlert>,
) {
    for (i, first) in medications.iter().enumerate() {
        for second in &medications[i + 1..] {
            for rule in &rulebook.interactions {
                let forward = matches_medication(first, &rule.drug_a)
                    && matches_medication(second, &rule.drug_b);
                let reverse = matches_medication(first, &rule.drug_b)
                    && matches_medication(second, &rule.drug_a);
                if !forward && !reverse {
                    continue;
                }

                alerts.push(SafetyAlert {
                    id: Uuid::new_v4(),
                    alert_type: AlertType::Interaction,
                    severity: rule.severity,
                    title: format!("Interaction: {} + {}", first.name, second.name),
                    description: rule.description.clone(),
                    medications: vec![first.name.clone(), second.name.clone()],
                    recommendations: vec![rule.management.clone()],
                    source: "interaction table".into(),
                });
                break;
            }
        }
    }
}

/// Classify by keyword table; a class with two or more members yields
/// one moderate alert naming all of them
fn detect_duplicate_therapy(
    rulebook: &Rulebook,
    medications: &[&Medication],
    alerts: &mut Vec<SafetyAlert>,
) {
    for class in &rulebook.classes {
        let members: Vec<String> = medications
            .iter()
            .filter(|m| class.keywords.iter().any(|k| matches_medication(m, k)))
            .map(|m| m.name.clone())
            .collect();

        if members.len() >= 2 {
            alerts.push(SafetyAlert {
                id: Uuid::new_v4(),
                alert_type: AlertType::Duplicate,
                severity: AlertSeverity::Moderate,
                title: format!("Duplicate therapy: {}", class.class_name),
                description: format!(
                    "{} medications from the same therapeutic class ({}) are active: {}.",
                    members.len(),
                    class.class_name,
                    members.join(", ")
                ),
                medications: members,
                recommendations: vec![
                    "Confirm with the prescriber that both agents are intended.".into(),
                ],
                source: "therapeutic class table".into(),
            });
        }
    }
}

/// Pairwise scan against the separation table
///
/// Fires on co-presence of both drugs, deliberately without consulting
/// actual scheduled times; the recommendation carries the separation.
fn detect_timing_separation(
    rulebook: &Rulebook,
    medications: &[&Medication],
    alerts: &mut Vec<SafetyAlert>,
) {
    for (i, first) in medications.iter().enumerate() {
        for second in &medications[i + 1..] {
            for rule in &rulebook.separations {
                let forward = matches_medication(first, &rule.drug_a)
                    && matches_medication(second, &rule.drug_b);
                let reverse = matches_medication(first, &rule.drug_b)
                    && matches_medication(second, &rule.drug_a);
                if !forward && !reverse {
                    continue;
                }

                alerts.push(SafetyAlert {
                    id: Uuid::new_v4(),
                    alert_type: AlertType::Timing,
                    severity: AlertSeverity::Moderate,
                    title: format!("Timing: {} + {}", first.name, second.name),
                    description: rule.reason.clone(),
                    medications: vec![first.name.clone(), second.name.clone()],
                    recommendations: vec![format!(
                        "Separate doses of {} and {} by at least {} hours.",
                        first.name, second.name, rule.minimum_hours
                    )],
                    source: "separation table".into(),
                });
                break;
            }
        }
    }
}

fn allergy_alert_severity(severity: AllergySeverity) -> AlertSeverity {
    match severity {
        AllergySeverity::Anaphylaxis => AlertSeverity::Critical,
        AllergySeverity::Severe => AlertSeverity::Major,
        AllergySeverity::Moderate | AllergySeverity::Mild => AlertSeverity::Moderate,
    }
}

/// Match each medication against each profile allergy
fn detect_allergy_conflicts(
    medications: &[&Medication],
    profile: &PatientSafetyProfile,
    alerts: &mut Vec<SafetyAlert>,
) {
    for medication in medications {
        for allergy in &profile.allergies {
            if !matches_medication(medication, &allergy.allergen) {
                continue;
            }

            alerts.push(SafetyAlert {
                id: Uuid::new_v4(),
                alert_type: AlertType::Allergy,
                severity: allergy_alert_severity(allergy.severity),
                title: format!("Allergy conflict: {}", medication.name),
                description: format!(
                    "{} matches recorded allergy to {} ({:?}).",
                    medication.name, allergy.allergen, allergy.severity
                ),
                medications: vec![medication.name.clone()],
                recommendations: vec![
                    "Do not take this medication.".into(),
                    "Contact the prescribing provider immediately.".into(),
                ],
                source: "patient safety profile".into(),
            });
        }
    }
}

/// Match each medication against each profile contraindication entry
fn detect_contraindications(
    medications: &[&Medication],
    profile: &PatientSafetyProfile,
    alerts: &mut Vec<SafetyAlert>,
) {
    for medication in medications {
        for entry in &profile.contraindications {
            if !matches_medication(medication, entry) {
                continue;
            }

            alerts.push(SafetyAlert {
                id: Uuid::new_v4(),
                alert_type: AlertType::Contraindication,
                severity: AlertSeverity::Major,
                title: format!("Contraindication: {}", medication.name),
                description: format!(
                    "{} matches recorded contraindication \"{}\".",
                    medication.name, entry
                ),
                medications: vec![medication.name.clone()],
                recommendations: vec![
                    "Review this medication with the prescribing provider.".into(),
                ],
                source: "patient safety profile".into(),
            });
        }
    }
}
