//! Constraint evaluation for a single candidate time.
//!
//! `evaluate` checks every constraint that restricts the medication against
//! the doses and meals in the schedule and reports all violations, never just
//! the first. It is a pure function of its inputs.

use crate::format::{duration_str, format_duration, format_time_of_day};
use crate::{Constraint, FoodRequirement, Medication, MedicationId, ReferenceData, Schedule};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::fmt;

/// Where a meal in the day's context comes from
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MealSource {
    /// Meal marker supplied with the schedule
    Marker,
    /// Implied by a dose of a medication taken with food
    Dose { medication: MedicationId, event: usize },
}

/// What a candidate collides with
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    /// Another dose sits closer than the constraint allows
    Dose {
        medication: MedicationId,
        at: NaiveDateTime,
        event: usize,
        #[serde(with = "duration_str")]
        gap: Duration,
    },
    /// A meal sits inside an empty-stomach buffer
    Meal {
        at: NaiveDateTime,
        source: MealSource,
        #[serde(with = "duration_str")]
        gap: Duration,
    },
    /// A with-food dose has no meal near it
    NoMeal,
}

/// A violated constraint and the reason it is violated
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Violation {
    pub constraint: Constraint,
    pub conflict: Conflict,
}

impl Violation {
    /// Schedule index of the dose that would have to move to clear this violation
    pub fn blocking_event(&self) -> Option<usize> {
        match &self.conflict {
            Conflict::Dose { event, .. } => Some(*event),
            Conflict::Meal {
                source: MealSource::Dose { event, .. },
                ..
            } => Some(*event),
            _ => None,
        }
    }

    /// When the blocking dose sits
    pub fn blocking_time(&self) -> Option<NaiveDateTime> {
        match &self.conflict {
            Conflict::Dose { at, .. } | Conflict::Meal { at, .. } => Some(*at),
            Conflict::NoMeal => None,
        }
    }

    /// Distance the blocking dose must keep from the candidate
    pub fn required_gap(&self) -> Option<Duration> {
        match (&self.constraint, &self.conflict) {
            (Constraint::DrugInteraction { min_gap, .. }, Conflict::Dose { .. })
            | (Constraint::MinGap { min_gap, .. }, Conflict::Dose { .. }) => Some(*min_gap),
            (Constraint::FoodTiming { buffer, .. }, Conflict::Meal { .. }) => Some(*buffer),
            _ => None,
        }
    }

    /// Two violations have the same cause when they name the same constraint
    /// and the same blocking dose or meal, whatever the candidate was
    pub fn same_cause(&self, other: &Violation) -> bool {
        if self.constraint != other.constraint {
            return false;
        }
        match (&self.conflict, &other.conflict) {
            (Conflict::NoMeal, Conflict::NoMeal) => true,
            (Conflict::Dose { medication: a, at: ta, .. }, Conflict::Dose { medication: b, at: tb, .. }) => {
                a == b && ta == tb
            }
            (Conflict::Meal { at: ta, .. }, Conflict::Meal { at: tb, .. }) => ta == tb,
            _ => false,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.conflict {
            Conflict::Dose {
                medication, at, gap, ..
            } => write!(
                f,
                "{}: {} dose at {} would be only {} away",
                self.constraint,
                medication,
                format_time_of_day(at.time()),
                format_duration(*gap)
            ),
            Conflict::Meal { at, source, gap } => {
                write!(
                    f,
                    "{}: meal at {}",
                    self.constraint,
                    format_time_of_day(at.time())
                )?;
                if let MealSource::Dose { medication, .. } = source {
                    write!(f, " (taken with {})", medication)?;
                }
                write!(f, " would be only {} away", format_duration(*gap))
            }
            Conflict::NoMeal => write!(f, "{}: no meal nearby", self.constraint),
        }
    }
}

/// Result of checking one candidate time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub candidate: NaiveDateTime,
    pub satisfied: bool,
    pub violations: Vec<Violation>,
}

/// Check `candidate` for `medication` against every applicable constraint
///
/// Only pending and taken doses in `schedule` are considered; doses of the
/// medication itself are only relevant to minimum-gap constraints.
pub fn evaluate(
    candidate: NaiveDateTime,
    medication: &Medication,
    schedule: &Schedule,
    reference: &ReferenceData,
) -> Evaluation {
    let mut violations = Vec::new();

    for constraint in reference.constraints_for(medication) {
        match constraint {
            Constraint::DrugInteraction {
                drug_a,
                drug_b,
                min_gap,
                ..
            } => {
                let partner = if medication.answers_to(drug_a) {
                    drug_b
                } else {
                    drug_a
                };
                for (event, dose) in schedule.active_doses() {
                    if dose.medication.eq_ignore_ascii_case(&medication.id)
                        || !reference.designates(partner, &dose.medication)
                    {
                        continue;
                    }
                    let gap = distance(candidate, dose.at);
                    if gap < *min_gap {
                        violations.push(Violation {
                            constraint: constraint.clone(),
                            conflict: Conflict::Dose {
                                medication: dose.medication.clone(),
                                at: dose.at,
                                event,
                                gap,
                            },
                        });
                    }
                }
            }

            Constraint::FoodTiming {
                requirement,
                buffer,
                ..
            } => {
                let meals = meals_around(medication, schedule, reference);
                match requirement {
                    FoodRequirement::EmptyStomach => {
                        for (at, source) in meals {
                            let gap = distance(candidate, at);
                            if gap < *buffer {
                                violations.push(Violation {
                                    constraint: constraint.clone(),
                                    conflict: Conflict::Meal { at, source, gap },
                                });
                            }
                        }
                    }
                    FoodRequirement::WithFood => {
                        if !meals.iter().any(|(at, _)| distance(candidate, *at) <= *buffer) {
                            violations.push(Violation {
                                constraint: constraint.clone(),
                                conflict: Conflict::NoMeal,
                            });
                        }
                    }
                    FoodRequirement::None => {}
                }
            }

            Constraint::MinGap {
                drug,
                other,
                min_gap,
                ..
            } => {
                let partner = match other {
                    None => None,
                    Some(other) if medication.answers_to(drug) => Some(other),
                    Some(_) => Some(drug),
                };
                for (event, dose) in schedule.active_doses() {
                    let own = dose.medication.eq_ignore_ascii_case(&medication.id);
                    let relevant = match partner {
                        None => own,
                        Some(partner) => !own && reference.designates(partner, &dose.medication),
                    };
                    if !relevant {
                        continue;
                    }
                    let gap = distance(candidate, dose.at);
                    if gap < *min_gap {
                        violations.push(Violation {
                            constraint: constraint.clone(),
                            conflict: Conflict::Dose {
                                medication: dose.medication.clone(),
                                at: dose.at,
                                event,
                                gap,
                            },
                        });
                    }
                }
            }
        }
    }

    tracing::debug!(
        "Evaluated {} at {}: {} violation(s)",
        medication.id,
        candidate,
        violations.len()
    );

    Evaluation {
        candidate,
        satisfied: violations.is_empty(),
        violations,
    }
}

/// Meal markers plus meals implied by other with-food doses, in time order
fn meals_around(
    medication: &Medication,
    schedule: &Schedule,
    reference: &ReferenceData,
) -> Vec<(NaiveDateTime, MealSource)> {
    let mut meals: Vec<_> = schedule
        .meals()
        .iter()
        .map(|at| (*at, MealSource::Marker))
        .collect();

    for (event, dose) in schedule.active_doses() {
        if !dose.medication.eq_ignore_ascii_case(&medication.id)
            && reference.taken_with_food(&dose.medication)
        {
            meals.push((
                dose.at,
                MealSource::Dose {
                    medication: dose.medication.clone(),
                    event,
                },
            ));
        }
    }

    meals.sort_by_key(|(at, _)| *at);
    meals
}

fn distance(a: NaiveDateTime, b: NaiveDateTime) -> Duration {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DoseEvent, DoseStatus};
    use chrono::{NaiveDate, NaiveTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn med(id: &str, food: FoodRequirement, tags: &[&str]) -> Medication {
        Medication {
            id: id.into(),
            name: id.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            food,
            dose_times: vec![NaiveTime::from_hms_opt(8, 0, 0).unwrap()],
        }
    }

    fn reference(constraints: Vec<Constraint>) -> ReferenceData {
        ReferenceData::new(
            vec![
                med("levothyroxine", FoodRequirement::EmptyStomach, &["thyroid"]),
                med("metformin", FoodRequirement::WithFood, &["diabetes"]),
                med("calcium_carbonate", FoodRequirement::None, &["calcium"]),
            ],
            constraints,
        )
        .unwrap()
    }

    fn interaction(gap_hours: i64) -> Constraint {
        Constraint::DrugInteraction {
            drug_a: "levothyroxine".into(),
            drug_b: "calcium".into(),
            min_gap: Duration::hours(gap_hours),
            description: "Take 4 hours apart from calcium".into(),
        }
    }

    fn empty_stomach() -> Constraint {
        Constraint::FoodTiming {
            drug: "levothyroxine".into(),
            requirement: FoodRequirement::EmptyStomach,
            buffer: Duration::minutes(30),
            description: String::new(),
        }
    }

    #[test]
    fn test_interaction_against_tagged_partner() {
        let data = reference(vec![interaction(4)]);
        let levo = data.medication("levothyroxine").unwrap();
        let schedule = Schedule::from_events(vec![DoseEvent::pending("calcium_carbonate", at(11, 0))]);

        let eval = evaluate(at(8, 0), levo, &schedule, &data);
        assert!(!eval.satisfied);
        assert_eq!(eval.violations.len(), 1);
        assert!(matches!(
            eval.violations[0].conflict,
            Conflict::Dose { gap, .. } if gap == Duration::hours(3)
        ));

        assert!(evaluate(at(7, 0), levo, &schedule, &data).satisfied);
    }

    #[test]
    fn test_interaction_is_symmetric() {
        let data = reference(vec![interaction(4)]);
        let calcium = data.medication("calcium_carbonate").unwrap();
        let schedule = Schedule::from_events(vec![DoseEvent::new(
            "levothyroxine",
            at(8, 0),
            DoseStatus::Taken,
        )]);

        assert!(!evaluate(at(10, 0), calcium, &schedule, &data).satisfied);
        assert!(evaluate(at(12, 0), calcium, &schedule, &data).satisfied);
    }

    #[test]
    fn test_empty_stomach_sees_meals_from_with_food_doses() {
        let data = reference(vec![empty_stomach()]);
        let levo = data.medication("levothyroxine").unwrap();
        let schedule = Schedule::from_events(vec![DoseEvent::pending("metformin", at(8, 0))]);

        let eval = evaluate(at(8, 0), levo, &schedule, &data);
        assert_eq!(eval.violations.len(), 1);
        assert!(matches!(
            &eval.violations[0].conflict,
            Conflict::Meal { source: MealSource::Dose { medication, event: 0 }, .. } if medication == "metformin"
        ));
        assert_eq!(eval.violations[0].blocking_event(), Some(0));

        // buffer boundary is allowed
        assert!(evaluate(at(8, 30), levo, &schedule, &data).satisfied);
    }

    #[test]
    fn test_empty_stomach_sees_meal_markers() {
        let data = reference(vec![empty_stomach()]);
        let levo = data.medication("levothyroxine").unwrap();
        let schedule = Schedule::new().with_meals([at(7, 45)]);

        let eval = evaluate(at(8, 0), levo, &schedule, &data);
        assert_eq!(eval.violations.len(), 1);
        assert_eq!(eval.violations[0].blocking_event(), None);
    }

    #[test]
    fn test_with_food_needs_a_meal() {
        let data = reference(vec![Constraint::FoodTiming {
            drug: "metformin".into(),
            requirement: FoodRequirement::WithFood,
            buffer: Duration::minutes(30),
            description: String::new(),
        }]);
        let metformin = data.medication("metformin").unwrap();
        let schedule = Schedule::new().with_meals([at(12, 0)]);

        let eval = evaluate(at(8, 0), metformin, &schedule, &data);
        assert_eq!(eval.violations[0].conflict, Conflict::NoMeal);
        assert!(evaluate(at(12, 30), metformin, &schedule, &data).satisfied);
    }

    #[test]
    fn test_self_gap_spans_rolling_window() {
        let data = reference(vec![Constraint::MinGap {
            drug: "metformin".into(),
            other: None,
            min_gap: Duration::hours(8),
            description: String::new(),
        }]);
        let metformin = data.medication("metformin").unwrap();
        let next_morning = at(7, 0) + Duration::days(1);
        let schedule = Schedule::from_events(vec![
            DoseEvent::new("metformin", at(21, 0), DoseStatus::Missed),
            DoseEvent::pending("metformin", next_morning),
        ]);

        let eval = evaluate(at(23, 30), metformin, &schedule, &data);
        assert_eq!(eval.violations.len(), 1);
        assert!(eval.violations[0].to_string().contains("07:00"));
    }

    #[test]
    fn test_collects_every_violation() {
        let data = reference(vec![interaction(4), empty_stomach()]);
        let levo = data.medication("levothyroxine").unwrap();
        let schedule = Schedule::from_events(vec![
            DoseEvent::pending("metformin", at(8, 0)),
            DoseEvent::pending("calcium_carbonate", at(9, 0)),
        ]);

        let eval = evaluate(at(8, 0), levo, &schedule, &data);
        assert_eq!(eval.violations.len(), 2);
        assert_eq!(eval.violations[0].constraint.kind(), "drug_interaction");
        assert_eq!(eval.violations[1].constraint.kind(), "food_timing");
    }

    #[test]
    fn test_evaluate_is_pure() {
        let data = reference(vec![interaction(4), empty_stomach()]);
        let levo = data.medication("levothyroxine").unwrap();
        let schedule = Schedule::from_events(vec![
            DoseEvent::pending("metformin", at(8, 0)),
            DoseEvent::pending("calcium_carbonate", at(9, 0)),
        ]);
        let before = schedule.clone();

        let first = evaluate(at(8, 15), levo, &schedule, &data);
        let second = evaluate(at(8, 15), levo, &schedule, &data);
        assert_eq!(first, second);
        assert_eq!(schedule, before);
    }
}
