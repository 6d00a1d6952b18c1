//! Default safety rulebook: interaction, therapeutic-class, and
//! timing-separation tables.
//!
//! The rulebook is an explicit, immutable object handed to the safety
//! engine, not ambient state. The built-in tables cover common
//! community-pharmacy hazards; deployments can build their own.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::AlertSeverity;

/// A known pairwise drug-drug interaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionRule {
    pub drug_a: String,
    pub drug_b: String,
    pub severity: AlertSeverity,
    pub description: String,
    pub management: String,
}

/// A therapeutic class and the name fragments that identify members
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TherapeuticClass {
    pub class_name: String,
    pub keywords: Vec<String>,
}

/// A pair of drugs whose doses should be separated in time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeparationRule {
    pub drug_a: String,
    pub drug_b: String,
    pub minimum_hours: u8,
    pub reason: String,
}

/// The complete rule tables consumed by the safety engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Rulebook {
    pub interactions: Vec<InteractionRule>,
    pub classes: Vec<TherapeuticClass>,
    pub separations: Vec<SeparationRule>,
}

impl Rulebook {
    /// Validate the tables
    ///
    /// Returns a list of problems rather than failing on the first,
    /// so a hand-edited rulebook can be fixed in one pass.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (i, rule) in self.interactions.iter().enumerate() {
            if rule.drug_a.trim().is_empty() || rule.drug_b.trim().is_empty() {
                errors.push(format!("interaction rule {} has an empty drug name", i));
            }
            if rule.drug_a.eq_ignore_ascii_case(&rule.drug_b) {
                errors.push(format!(
                    "interaction rule {} pairs {} with itself",
                    i, rule.drug_a
                ));
            }
        }

        for class in &self.classes {
            if class.keywords.is_empty() {
                errors.push(format!("class {} has no keywords", class.class_name));
            }
        }

        for (i, rule) in self.separations.iter().enumerate() {
            if rule.minimum_hours == 0 || rule.minimum_hours > 24 {
                errors.push(format!(
                    "separation rule {} has minimum_hours {} outside [1, 24]",
                    i, rule.minimum_hours
                ));
            }
        }

        errors
    }
}

/// Cached default rulebook - built once and reused across evaluations
static DEFAULT_RULEBOOK: Lazy<Rulebook> = Lazy::new(build_default_rulebook);

/// Get a reference to the cached default rulebook
pub fn get_default_rulebook() -> &'static Rulebook {
    &DEFAULT_RULEBOOK
}

/// Builds the default rulebook with built-in hazard tables
///
/// **Note**: For production use, prefer `get_default_rulebook()` which
/// returns a cached reference. This function is retained for testing
/// and custom rulebook creation.
pub fn build_default_rulebook() -> Rulebook {
    let interaction = |a: &str, b: &str, severity, description: &str, management: &str| {
        InteractionRule {
            drug_a: a.into(),
            drug_b: b.into(),
            severity,
            description: description.into(),
            management: management.into(),
        }
    };

    let interactions = vec![
        interaction(
            "warfarin",
            "aspirin",
            AlertSeverity::Major,
            "Combined anticoagulant and antiplatelet effects markedly increase bleeding risk.",
            "Avoid combination if possible; if unavoidable, monitor INR closely and watch for bruising or GI bleeding.",
        ),
        interaction(
            "warfarin",
            "ibuprofen",
            AlertSeverity::Major,
            "NSAIDs increase bleeding risk with warfarin through antiplatelet effects and GI mucosal damage.",
            "Prefer acetaminophen for pain relief; monitor INR if an NSAID cannot be avoided.",
        ),
        interaction(
            "lisinopril",
            "spironolactone",
            AlertSeverity::Major,
            "ACE inhibitors with potassium-sparing diuretics can cause dangerous hyperkalemia.",
            "Monitor serum potassium and renal function; avoid potassium supplements.",
        ),
        interaction(
            "sildenafil",
            "nitroglycerin",
            AlertSeverity::Critical,
            "PDE5 inhibitors potentiate nitrates and can cause severe, refractory hypotension.",
            "Never take together; seek immediate care for chest pain rather than combining.",
        ),
        interaction(
            "metformin",
            "prednisone",
            AlertSeverity::Moderate,
            "Corticosteroids raise blood glucose and blunt metformin's glycemic control.",
            "Monitor blood glucose more frequently while both are prescribed.",
        ),
        interaction(
            "simvastatin",
            "clarithromycin",
            AlertSeverity::Major,
            "Macrolide CYP3A4 inhibition raises statin levels and rhabdomyolysis risk.",
            "Hold the statin for the antibiotic course or switch to a non-interacting agent.",
        ),
        interaction(
            "sertraline",
            "tramadol",
            AlertSeverity::Major,
            "Combined serotonergic agents increase the risk of serotonin syndrome.",
            "Watch for agitation, tremor, and fever; use the lowest effective doses.",
        ),
        interaction(
            "digoxin",
            "furosemide",
            AlertSeverity::Moderate,
            "Diuretic-induced hypokalemia potentiates digoxin toxicity.",
            "Monitor potassium and digoxin levels; replete potassium as needed.",
        ),
    ];

    let class = |class_name: &str, keywords: &[&str]| TherapeuticClass {
        class_name: class_name.into(),
        keywords: keywords.iter().map(|k| (*k).into()).collect(),
    };

    let classes = vec![
        class("NSAID", &["ibuprofen", "naproxen", "diclofenac", "ketorolac", "aspirin"]),
        class("ACE inhibitor", &["lisinopril", "enalapril", "ramipril", "captopril"]),
        class("statin", &["atorvastatin", "simvastatin", "rosuvastatin", "pravastatin"]),
        class("SSRI", &["sertraline", "fluoxetine", "citalopram", "escitalopram", "paroxetine"]),
        class(
            "proton pump inhibitor",
            &["omeprazole", "esomeprazole", "pantoprazole", "lansoprazole"],
        ),
        class("benzodiazepine", &["diazepam", "lorazepam", "alprazolam", "clonazepam"]),
        class("beta blocker", &["metoprolol", "atenolol", "propranolol", "carvedilol"]),
    ];

    let separation = |a: &str, b: &str, minimum_hours: u8, reason: &str| SeparationRule {
        drug_a: a.into(),
        drug_b: b.into(),
        minimum_hours,
        reason: reason.into(),
    };

    let separations = vec![
        separation(
            "levothyroxine",
            "calcium",
            4,
            "Calcium binds levothyroxine in the gut and blocks absorption.",
        ),
        separation(
            "levothyroxine",
            "iron",
            4,
            "Iron salts chelate levothyroxine and reduce absorption.",
        ),
        separation(
            "ciprofloxacin",
            "antacid",
            2,
            "Aluminum and magnesium antacids chelate fluoroquinolones.",
        ),
        separation(
            "tetracycline",
            "calcium",
            2,
            "Divalent cations chelate tetracyclines and reduce absorption.",
        ),
    ];

    Rulebook {
        interactions,
        classes,
        separations,
    }
}
