//! Deterministic rule-based rescheduling.
//!
//! ## Decision Logic
//!
//! 1. **Walk candidates** in ascending time order.
//! 2. **Clean candidate**: the first time with no violations is taken.
//! 3. **Single-hop shift**: if every violation points at the same pending dose
//!    of another medication, move that one dose just far enough away, as long
//!    as the move is small and creates no new violation for it.
//! 4. **Skip**: nothing feasible before the horizon.
//!
//! Earliest time wins; at the same time a clean candidate beats a shift
//! because it is checked first.

use super::{merge_violations, prepare, RescheduleStrategy};
use crate::candidates::{generate, horizon, CandidatePolicy};
use crate::config::SchedulingConfig;
use crate::evaluator::{evaluate, Evaluation, Violation};
use crate::format::{format_duration, format_time_of_day};
use crate::{
    Action, Adjustment, Constraint, DoseEvent, DoseStatus, Medication, MissedDose, ReferenceData,
    RescheduleProposal, Result, Schedule, StrategyKind,
};
use chrono::{Duration, NaiveDateTime};

/// Rule-based strategy; also the fallback for the advisory strategy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleBasedStrategy {
    policy: CandidatePolicy,
    late_warning_after: Duration,
    max_adjustment: Duration,
}

impl Default for RuleBasedStrategy {
    fn default() -> Self {
        Self {
            policy: CandidatePolicy::default(),
            late_warning_after: Duration::hours(2),
            max_adjustment: Duration::hours(1),
        }
    }
}

impl RuleBasedStrategy {
    pub fn new(policy: CandidatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self {
            policy: config.candidate_policy(),
            late_warning_after: config.late_warning_after,
            max_adjustment: config.max_adjustment,
        }
    }

    pub fn with_max_adjustment(mut self, max_adjustment: Duration) -> Self {
        self.max_adjustment = max_adjustment;
        self
    }

    pub fn with_late_warning_after(mut self, late_warning_after: Duration) -> Self {
        self.late_warning_after = late_warning_after;
        self
    }

    pub fn policy(&self) -> &CandidatePolicy {
        &self.policy
    }

    /// Try to clear `evaluation` by moving exactly one other dose
    fn resolve_single_hop(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        schedule: &Schedule,
        reference: &ReferenceData,
        evaluation: &Evaluation,
    ) -> Option<Adjustment> {
        let candidate = evaluation.candidate;
        let event = evaluation.violations.first()?.blocking_event()?;
        if evaluation
            .violations
            .iter()
            .any(|v| v.blocking_event() != Some(event))
        {
            return None;
        }

        let dose = schedule.events().get(event)?;
        if dose.status != DoseStatus::Pending || dose.medication.eq_ignore_ascii_case(&medication.id) {
            return None;
        }
        let shifted_med = reference.find_medication(&dose.medication)?;

        let gap = evaluation
            .violations
            .iter()
            .filter_map(Violation::required_gap)
            .max()?;
        let target = if dose.at >= candidate {
            candidate.checked_add_signed(gap)?
        } else {
            candidate.checked_sub_signed(gap)?
        };
        if target < missed.now {
            return None;
        }
        let moved_by = if target >= dose.at {
            target - dose.at
        } else {
            dose.at - target
        };
        if moved_by > self.max_adjustment {
            tracing::debug!(
                "Shifting {} by {} exceeds the {} limit",
                dose.medication,
                format_duration(moved_by),
                format_duration(self.max_adjustment)
            );
            return None;
        }

        let shifted = schedule.shifted(event, target);
        if !evaluate(candidate, medication, &shifted, reference).satisfied {
            return None;
        }

        // The moved dose must not pick up violations it did not already have.
        let with_missed = shifted.with_event(DoseEvent::pending(medication.id.clone(), candidate));
        let moved_idx = with_missed.find(&dose.medication, target)?;
        let after = evaluate(target, shifted_med, &with_missed.without(moved_idx), reference);
        let before = evaluate(dose.at, shifted_med, &schedule.without(event), reference);
        if after
            .violations
            .iter()
            .any(|v| !before.violations.iter().any(|b| b.same_cause(v)))
        {
            tracing::debug!(
                "Shifting {} to {} introduces new violations",
                dose.medication,
                target
            );
            return None;
        }

        let cause = &evaluation.violations[0].constraint;
        Some(Adjustment {
            medication: dose.medication.clone(),
            from: dose.at,
            to: target,
            reason: format!(
                "moved {} so {} can be taken at {} ({})",
                format_duration(moved_by),
                medication.id,
                format_time_of_day(candidate.time()),
                cause
            ),
        })
    }

    /// Earliest feasible time with any shift it needs, or every distinct
    /// violation seen on the way to the horizon
    ///
    /// `schedule` must already have the missed dose marked.
    pub(crate) fn resolve(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> std::result::Result<(NaiveDateTime, Vec<Adjustment>), Vec<Violation>> {
        let mut unresolved: Vec<Violation> = Vec::new();
        for candidate in generate(missed, schedule, &self.policy) {
            let evaluation = evaluate(candidate, medication, schedule, reference);
            if evaluation.satisfied {
                return Ok((candidate, Vec::new()));
            }
            if let Some(adjustment) =
                self.resolve_single_hop(missed, medication, schedule, reference, &evaluation)
            {
                return Ok((candidate, vec![adjustment]));
            }
            merge_violations(&mut unresolved, evaluation.violations);
        }
        Err(unresolved)
    }

    fn take_at(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        reference: &ReferenceData,
        at: NaiveDateTime,
        adjustments: Vec<Adjustment>,
    ) -> RescheduleProposal {
        let mut reasoning = if at == missed.now {
            format!("Take {} now; no constraint conflicts.", medication.name)
        } else {
            format!(
                "Take {} at {}, the earliest time clear of all constraints.",
                medication.name,
                format_time_of_day(at.time())
            )
        };
        for adjustment in &adjustments {
            reasoning.push_str(&format!(
                " Move {} from {} to {}.",
                adjustment.medication,
                format_time_of_day(adjustment.from.time()),
                format_time_of_day(adjustment.to.time())
            ));
        }

        tracing::info!(
            "Rule-based: take {} at {} with {} adjustment(s)",
            medication.id,
            at,
            adjustments.len()
        );

        RescheduleProposal {
            missed: missed.clone(),
            action: Action::TakeAt(at),
            adjustments,
            warnings: self.standing_warnings(missed, medication, reference, at),
            violations: Vec::new(),
            strategy: StrategyKind::RuleBased,
            reasoning,
        }
    }

    fn skip(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        horizon: NaiveDateTime,
        violations: Vec<Violation>,
    ) -> RescheduleProposal {
        let mut warnings: Vec<String> = violations
            .iter()
            .map(|v| format!("Unresolved: {}", v))
            .collect();
        if violations.is_empty() {
            warnings.push(format!(
                "Too late to take the missed dose before {}; skip it and resume the normal schedule",
                format_time_of_day(horizon.time())
            ));
        }

        tracing::info!(
            "Rule-based: skip {} ({} unresolved constraint(s))",
            medication.id,
            violations.len()
        );

        RescheduleProposal {
            missed: missed.clone(),
            action: Action::Skip,
            adjustments: Vec::new(),
            warnings,
            violations,
            strategy: StrategyKind::RuleBased,
            reasoning: format!(
                "Skip this dose of {} and take the next scheduled dose.",
                medication.name
            ),
        }
    }

    /// Lateness and interaction reminders for a dose taken at `at`
    pub(crate) fn standing_warnings(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        reference: &ReferenceData,
        at: NaiveDateTime,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        let delay = at - missed.scheduled_at;
        if delay >= self.late_warning_after {
            warnings.push(format!(
                "Dose will be taken {} late; contact your provider if concerned",
                format_duration(delay)
            ));
        }

        for constraint in reference.constraints_for(medication) {
            if let Constraint::DrugInteraction {
                drug_a,
                drug_b,
                min_gap,
                description,
            } = constraint
            {
                let mut text = format!(
                    "Maintain the {} gap between {} and {}",
                    format_duration(*min_gap),
                    drug_a,
                    drug_b
                );
                if !description.is_empty() {
                    text.push_str(&format!(": {}", description));
                }
                warnings.push(text);
            }
        }

        warnings
    }
}

impl RescheduleStrategy for RuleBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RuleBased
    }

    fn propose(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal> {
        let (medication, schedule) = prepare(missed, schedule, reference)?;
        match self.resolve(missed, medication, &schedule, reference) {
            Ok((at, adjustments)) => Ok(self.take_at(missed, medication, reference, at, adjustments)),
            Err(unresolved) => {
                let horizon = horizon(missed, &schedule, &self.policy);
                Ok(self.skip(missed, medication, horizon, unresolved))
            }
        }
    }
}
