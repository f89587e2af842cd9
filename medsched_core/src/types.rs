//! Core domain types for missed-dose rescheduling.
//!
//! This module defines the fundamental types used throughout the system:
//! - Medications and their food requirements
//! - Constraints (interactions, food timing, minimum gaps)
//! - Dose events and the schedule that owns them
//! - Missed-dose triggers and reschedule proposals
//! - The shared, read-only reference data

use crate::evaluator::Violation;
use crate::format::{duration_str, format_duration, time_list};
use crate::{Error, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Medication identifier as written in definition files
pub type MedicationId = String;

// ============================================================================
// Medication Types
// ============================================================================

/// How a medication relates to meals
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FoodRequirement {
    #[default]
    None,
    WithFood,
    EmptyStomach,
}

impl fmt::Display for FoodRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FoodRequirement::None => "no food requirement",
            FoodRequirement::WithFood => "with food",
            FoodRequirement::EmptyStomach => "on an empty stomach",
        };
        f.write_str(text)
    }
}

/// A medication definition (e.g., "Levothyroxine")
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub food: FoodRequirement,
    #[serde(default, with = "time_list")]
    pub dose_times: Vec<NaiveTime>,
}

impl Medication {
    /// Whether a constraint reference (an id or a tag) designates this medication
    pub fn answers_to(&self, reference: &str) -> bool {
        self.id.eq_ignore_ascii_case(reference)
            || self.tags.iter().any(|t| t.eq_ignore_ascii_case(reference))
    }
}

// ============================================================================
// Constraint Types
// ============================================================================

/// A rule limiting when a medication may be taken
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Two drugs must be kept `min_gap` apart
    DrugInteraction {
        drug_a: String,
        drug_b: String,
        #[serde(with = "duration_str")]
        min_gap: Duration,
        #[serde(default)]
        description: String,
    },
    /// A drug must be taken with food, or away from it, within `buffer`
    FoodTiming {
        drug: String,
        requirement: FoodRequirement,
        #[serde(with = "duration_str")]
        buffer: Duration,
        #[serde(default)]
        description: String,
    },
    /// Minimum spacing between doses of a drug and itself (or `other`)
    MinGap {
        drug: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        other: Option<String>,
        #[serde(with = "duration_str")]
        min_gap: Duration,
        #[serde(default)]
        description: String,
    },
}

impl Constraint {
    /// Short machine-friendly name of the constraint kind
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::DrugInteraction { .. } => "drug_interaction",
            Constraint::FoodTiming { .. } => "food_timing",
            Constraint::MinGap { .. } => "min_gap",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Constraint::DrugInteraction { description, .. }
            | Constraint::FoodTiming { description, .. }
            | Constraint::MinGap { description, .. } => description,
        }
    }

    /// All drug references (ids or tags) named by this constraint
    pub fn drug_refs(&self) -> Vec<&str> {
        match self {
            Constraint::DrugInteraction { drug_a, drug_b, .. } => {
                vec![drug_a.as_str(), drug_b.as_str()]
            }
            Constraint::FoodTiming { drug, .. } => vec![drug.as_str()],
            Constraint::MinGap { drug, other, .. } => {
                let mut refs = vec![drug.as_str()];
                if let Some(other) = other {
                    refs.push(other.as_str());
                }
                refs
            }
        }
    }

    /// Whether this constraint restricts when `medication` may be taken
    pub fn applies_to(&self, medication: &Medication) -> bool {
        self.drug_refs().iter().any(|r| medication.answers_to(r))
    }

    /// Check the structural invariants of a single constraint
    pub fn validate(&self) -> Result<()> {
        for reference in self.drug_refs() {
            if reference.trim().is_empty() {
                return Err(Error::InvalidConstraint(format!(
                    "{} constraint has an empty drug reference",
                    self.kind()
                )));
            }
        }

        match self {
            Constraint::DrugInteraction {
                drug_a,
                drug_b,
                min_gap,
                ..
            } => {
                if drug_a.eq_ignore_ascii_case(drug_b) {
                    return Err(Error::InvalidConstraint(format!(
                        "drug interaction pairs '{}' with itself",
                        drug_a
                    )));
                }
                if *min_gap <= Duration::zero() {
                    return Err(Error::InvalidConstraint(format!(
                        "drug interaction {} <-> {} needs a positive gap, got {}",
                        drug_a,
                        drug_b,
                        format_duration(*min_gap)
                    )));
                }
            }
            Constraint::FoodTiming {
                drug,
                requirement,
                buffer,
                ..
            } => {
                if *requirement == FoodRequirement::None {
                    return Err(Error::InvalidConstraint(format!(
                        "food timing for '{}' must be with_food or empty_stomach",
                        drug
                    )));
                }
                if *buffer < Duration::zero() {
                    return Err(Error::InvalidConstraint(format!(
                        "food timing for '{}' has a negative buffer",
                        drug
                    )));
                }
            }
            Constraint::MinGap { drug, min_gap, .. } => {
                if *min_gap < Duration::zero() {
                    return Err(Error::InvalidConstraint(format!(
                        "minimum gap for '{}' is negative",
                        drug
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::DrugInteraction {
                drug_a,
                drug_b,
                min_gap,
                ..
            } => write!(
                f,
                "{} and {} must be at least {} apart",
                drug_a,
                drug_b,
                format_duration(*min_gap)
            ),
            Constraint::FoodTiming {
                drug,
                requirement: FoodRequirement::WithFood,
                buffer,
                ..
            } => write!(
                f,
                "{} must be taken within {} of a meal",
                drug,
                format_duration(*buffer)
            ),
            Constraint::FoodTiming {
                drug,
                requirement,
                buffer,
                ..
            } => write!(
                f,
                "{} must be taken {} (no meal within {})",
                drug,
                requirement,
                format_duration(*buffer)
            ),
            Constraint::MinGap {
                drug,
                other: None,
                min_gap,
                ..
            } => write!(
                f,
                "{} doses must be at least {} apart",
                drug,
                format_duration(*min_gap)
            ),
            Constraint::MinGap {
                drug,
                other: Some(other),
                min_gap,
                ..
            } => write!(
                f,
                "{} must be at least {} from {}",
                drug,
                format_duration(*min_gap),
                other
            ),
        }
    }
}

// ============================================================================
// Dose Events and Schedule
// ============================================================================

/// Lifecycle of a single dose
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Pending,
    Taken,
    Missed,
    Skipped,
}

impl DoseStatus {
    /// Pending and taken doses are (or will be) in the body
    pub fn counts_as_dose(self) -> bool {
        matches!(self, DoseStatus::Pending | DoseStatus::Taken)
    }
}

/// A scheduled or historical dose of one medication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoseEvent {
    pub medication: MedicationId,
    pub at: NaiveDateTime,
    pub status: DoseStatus,
}

impl DoseEvent {
    pub fn new(medication: impl Into<MedicationId>, at: NaiveDateTime, status: DoseStatus) -> Self {
        Self {
            medication: medication.into(),
            at,
            status,
        }
    }

    pub fn pending(medication: impl Into<MedicationId>, at: NaiveDateTime) -> Self {
        Self::new(medication, at, DoseStatus::Pending)
    }
}

/// Dose events for one subject over a day or rolling window
///
/// Events are kept in chronological order; events at the same instant keep
/// their insertion order. Meal markers supplied by the caller sit alongside.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "ScheduleParts")]
pub struct Schedule {
    events: Vec<DoseEvent>,
    meals: Vec<NaiveDateTime>,
}

/// Wire form of a schedule; ordering is restored on the way in
#[derive(Deserialize)]
struct ScheduleParts {
    #[serde(default)]
    events: Vec<DoseEvent>,
    #[serde(default)]
    meals: Vec<NaiveDateTime>,
}

impl From<ScheduleParts> for Schedule {
    fn from(parts: ScheduleParts) -> Self {
        Schedule::from_events(parts.events).with_meals(parts.meals)
    }
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule from events in any order
    pub fn from_events(mut events: Vec<DoseEvent>) -> Self {
        events.sort_by_key(|e| e.at);
        Self {
            events,
            meals: Vec::new(),
        }
    }

    /// Pending schedule from every medication's nominal dose times
    pub fn nominal(reference: &ReferenceData, start: NaiveDate, days: u32) -> Self {
        let mut events = Vec::new();
        for offset in 0..days {
            let Some(date) = start.checked_add_signed(Duration::days(i64::from(offset))) else {
                break;
            };
            for med in reference.medications() {
                for time in &med.dose_times {
                    events.push(DoseEvent::pending(med.id.clone(), date.and_time(*time)));
                }
            }
        }
        Self::from_events(events)
    }

    /// Insert an event after any events at the same instant
    pub fn push(&mut self, event: DoseEvent) {
        let idx = self.events.partition_point(|e| e.at <= event.at);
        self.events.insert(idx, event);
    }

    pub fn add_meal(&mut self, at: NaiveDateTime) {
        let idx = self.meals.partition_point(|m| *m <= at);
        self.meals.insert(idx, at);
    }

    pub fn with_meals(mut self, meals: impl IntoIterator<Item = NaiveDateTime>) -> Self {
        for meal in meals {
            self.add_meal(meal);
        }
        self
    }

    pub fn events(&self) -> &[DoseEvent] {
        &self.events
    }

    pub fn meals(&self) -> &[NaiveDateTime] {
        &self.meals
    }

    /// Events that count as doses, with their index
    pub fn active_doses(&self) -> impl Iterator<Item = (usize, &DoseEvent)> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status.counts_as_dose())
    }

    /// Index of the event for `medication` at `at`
    pub fn find(&self, medication: &str, at: NaiveDateTime) -> Option<usize> {
        self.events
            .iter()
            .position(|e| e.at == at && e.medication.eq_ignore_ascii_case(medication))
    }

    /// Update the status of an event; returns false if no such event exists
    pub fn mark(&mut self, medication: &str, at: NaiveDateTime, status: DoseStatus) -> bool {
        match self.find(medication, at) {
            Some(idx) => {
                self.events[idx].status = status;
                true
            }
            None => false,
        }
    }

    /// Builder form of [`Schedule::mark`]
    pub fn with_status(mut self, medication: &str, at: NaiveDateTime, status: DoseStatus) -> Self {
        self.mark(medication, at, status);
        self
    }

    /// Copy of this schedule with one more event
    pub fn with_event(&self, event: DoseEvent) -> Self {
        let mut copy = self.clone();
        copy.push(event);
        copy
    }

    /// Copy of this schedule with event `index` moved to `to`
    pub fn shifted(&self, index: usize, to: NaiveDateTime) -> Self {
        let mut copy = self.clone();
        if index < copy.events.len() {
            let mut event = copy.events.remove(index);
            event.at = to;
            copy.push(event);
        }
        copy
    }

    /// Copy of this schedule without event `index`
    pub fn without(&self, index: usize) -> Self {
        let mut copy = self.clone();
        if index < copy.events.len() {
            copy.events.remove(index);
        }
        copy
    }

    /// Earliest pending dose of `medication` strictly after `after`
    pub fn next_pending_after(&self, medication: &str, after: NaiveDateTime) -> Option<&DoseEvent> {
        self.events
            .iter()
            .filter(|e| {
                e.at > after
                    && e.status == DoseStatus::Pending
                    && e.medication.eq_ignore_ascii_case(medication)
            })
            .min_by_key(|e| e.at)
    }
}

// ============================================================================
// Rescheduling Request and Proposal
// ============================================================================

/// Trigger for a rescheduling decision
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissedDose {
    pub medication: MedicationId,
    pub scheduled_at: NaiveDateTime,
    pub now: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MissedDose {
    pub fn new(
        medication: impl Into<MedicationId>,
        scheduled_at: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            medication: medication.into(),
            scheduled_at,
            now,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// How late the dose already is
    pub fn delay(&self) -> Duration {
        self.now - self.scheduled_at
    }
}

/// What to do about the missed dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "at", rename_all = "snake_case")]
pub enum Action {
    TakeNow,
    TakeAt(NaiveDateTime),
    Skip,
}

impl Action {
    /// The instant the dose is taken, if it is taken at all
    pub fn time(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Action::TakeNow => Some(now),
            Action::TakeAt(at) => Some(*at),
            Action::Skip => None,
        }
    }
}

/// A change to another dose made necessary by the decision
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Adjustment {
    pub medication: MedicationId,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub reason: String,
}

/// Which strategy produced a proposal
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RuleBased,
    Advisory,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::RuleBased => f.write_str("rule-based"),
            StrategyKind::Advisory => f.write_str("advisory"),
        }
    }
}

/// Outcome of a rescheduling decision; applied to the schedule elsewhere
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RescheduleProposal {
    pub missed: MissedDose,
    pub action: Action,
    pub adjustments: Vec<Adjustment>,
    pub warnings: Vec<String>,
    /// Constraints left unresolved; populated when the action is `Skip`
    pub violations: Vec<Violation>,
    pub strategy: StrategyKind,
    pub reasoning: String,
}

impl RescheduleProposal {
    pub fn is_skip(&self) -> bool {
        self.action == Action::Skip
    }
}

// ============================================================================
// Reference Data
// ============================================================================

/// Medications and constraints loaded once per session and shared read-only
#[derive(Clone, Debug, Default)]
pub struct ReferenceData {
    medications: Vec<Medication>,
    constraints: Vec<Constraint>,
}

impl ReferenceData {
    /// Validate and freeze a medication and constraint set
    pub fn new(medications: Vec<Medication>, constraints: Vec<Constraint>) -> Result<Self> {
        let data = Self::from_parts(medications, constraints);
        data.validate()?;
        tracing::debug!(
            "Reference data ready: {} medications, {} constraints",
            data.medications.len(),
            data.constraints.len()
        );
        Ok(data)
    }

    /// Assemble without validation; callers must run [`ReferenceData::validate`]
    pub(crate) fn from_parts(medications: Vec<Medication>, constraints: Vec<Constraint>) -> Self {
        Self {
            medications,
            constraints,
        }
    }

    /// Check ids are unique and every constraint is well formed and resolvable
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for med in &self.medications {
            if med.id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "medication '{}' has an empty id",
                    med.name
                )));
            }
            if !seen.insert(med.id.to_ascii_lowercase()) {
                return Err(Error::Config(format!("duplicate medication id '{}'", med.id)));
            }
        }

        for constraint in &self.constraints {
            constraint.validate()?;
            for reference in constraint.drug_refs() {
                if !self.resolves(reference) {
                    return Err(Error::UnknownMedication(format!(
                        "{} (referenced by {} constraint)",
                        reference,
                        constraint.kind()
                    )));
                }
            }
            if let Constraint::DrugInteraction { drug_a, drug_b, .. } = constraint {
                if let Some(med) = self
                    .medications
                    .iter()
                    .find(|m| m.answers_to(drug_a) && m.answers_to(drug_b))
                {
                    return Err(Error::InvalidConstraint(format!(
                        "drug interaction {} <-> {} names '{}' on both sides",
                        drug_a, drug_b, med.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn medications(&self) -> &[Medication] {
        &self.medications
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn find_medication(&self, id: &str) -> Option<&Medication> {
        self.medications.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    /// Look up a medication by id, failing with `UnknownMedication`
    pub fn medication(&self, id: &str) -> Result<&Medication> {
        self.find_medication(id)
            .ok_or_else(|| Error::UnknownMedication(id.to_string()))
    }

    /// Whether a constraint reference names any loaded medication
    pub fn resolves(&self, reference: &str) -> bool {
        self.medications.iter().any(|m| m.answers_to(reference))
    }

    /// Whether a dose of `medication_id` is designated by `reference`
    pub fn designates(&self, reference: &str, medication_id: &str) -> bool {
        match self.find_medication(medication_id) {
            Some(med) => med.answers_to(reference),
            None => medication_id.eq_ignore_ascii_case(reference),
        }
    }

    /// Constraints that restrict `medication`, in load order
    pub fn constraints_for<'a>(
        &'a self,
        medication: &'a Medication,
    ) -> impl Iterator<Item = &'a Constraint> + 'a {
        self.constraints
            .iter()
            .filter(move |c| c.applies_to(medication))
    }

    /// Whether doses of `medication_id` are taken with a meal
    pub fn taken_with_food(&self, medication_id: &str) -> bool {
        self.find_medication(medication_id)
            .map(|m| m.food == FoodRequirement::WithFood)
            .unwrap_or(false)
    }
}
