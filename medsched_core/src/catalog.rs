//! Built-in starter medications and constraints.
//!
//! Used when no medication or rule file is configured.

use crate::types::*;
use chrono::{Duration, NaiveTime};
use once_cell::sync::Lazy;

/// Cached default reference data - built once and shared across decisions
static DEFAULT_REFERENCE: Lazy<ReferenceData> = Lazy::new(build_default_reference);

/// Get a reference to the cached default reference data
pub fn get_default_reference() -> &'static ReferenceData {
    &DEFAULT_REFERENCE
}

/// Builds the default medications and constraints
///
/// **Note**: prefer `get_default_reference()` for decisions; this is retained
/// for tests and for callers that want an owned copy to extend.
pub fn build_default_reference() -> ReferenceData {
    ReferenceData::from_parts(default_medications(), default_constraints())
}

fn times(list: &[(u32, u32)]) -> Vec<NaiveTime> {
    list.iter()
        .filter_map(|(h, m)| NaiveTime::from_hms_opt(*h, *m, 0))
        .collect()
}

fn tags(list: &[&str]) -> std::collections::BTreeSet<String> {
    list.iter().map(|t| t.to_string()).collect()
}

fn default_medications() -> Vec<Medication> {
    vec![
        Medication {
            id: "levothyroxine".into(),
            name: "Levothyroxine".into(),
            tags: tags(&["thyroid"]),
            food: FoodRequirement::EmptyStomach,
            dose_times: times(&[(6, 0)]),
        },
        Medication {
            id: "metformin".into(),
            name: "Metformin".into(),
            tags: tags(&["diabetes", "biguanide"]),
            food: FoodRequirement::WithFood,
            dose_times: times(&[(8, 0), (20, 0)]),
        },
        Medication {
            id: "lisinopril".into(),
            name: "Lisinopril".into(),
            tags: tags(&["blood_pressure", "ace_inhibitor"]),
            food: FoodRequirement::None,
            dose_times: times(&[(8, 0)]),
        },
        // Supplements are taken ad hoc and have no nominal times.
        Medication {
            id: "calcium_carbonate".into(),
            name: "Calcium Carbonate".into(),
            tags: tags(&["calcium", "calcium_supplement", "supplement"]),
            food: FoodRequirement::None,
            dose_times: Vec::new(),
        },
        Medication {
            id: "ferrous_sulfate".into(),
            name: "Ferrous Sulfate".into(),
            tags: tags(&["iron", "supplement"]),
            food: FoodRequirement::None,
            dose_times: Vec::new(),
        },
    ]
}

fn default_constraints() -> Vec<Constraint> {
    vec![
        Constraint::DrugInteraction {
            drug_a: "levothyroxine".into(),
            drug_b: "calcium_supplement".into(),
            min_gap: Duration::hours(4),
            description: "Calcium blocks levothyroxine absorption".into(),
        },
        Constraint::DrugInteraction {
            drug_a: "levothyroxine".into(),
            drug_b: "iron".into(),
            min_gap: Duration::hours(4),
            description: "Iron blocks levothyroxine absorption".into(),
        },
        Constraint::FoodTiming {
            drug: "levothyroxine".into(),
            requirement: FoodRequirement::EmptyStomach,
            buffer: Duration::minutes(30),
            description: "Wait 30 minutes before eating".into(),
        },
        Constraint::MinGap {
            drug: "metformin".into(),
            other: None,
            min_gap: Duration::hours(8),
            description: "Space metformin doses at least 8 hours apart".into(),
        },
    ]
}
