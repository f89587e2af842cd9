//! Rescheduling strategies.
//!
//! Both strategies implement [`RescheduleStrategy`], so callers never need to
//! know which one produced a proposal. The advisory strategy always re-checks
//! the service's suggestion with the constraint evaluator and falls back to
//! the rule-based strategy when it cannot be trusted.

mod advisory;
mod rule_based;

pub use advisory::AdvisoryStrategy;
pub use rule_based::RuleBasedStrategy;

use crate::evaluator::Violation;
use crate::{
    DoseStatus, Error, Medication, MissedDose, ReferenceData, RescheduleProposal, Result,
    Schedule, StrategyKind,
};

/// A way of turning a missed dose into a proposal
pub trait RescheduleStrategy {
    fn kind(&self) -> StrategyKind;

    /// Decide what to do about `missed`; the schedule is never modified
    fn propose(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal>;
}

/// Resolve the medication and mark its scheduled dose as missed
///
/// The returned schedule is a private copy; the caller's stays untouched.
pub(crate) fn prepare<'a>(
    missed: &MissedDose,
    schedule: &Schedule,
    reference: &'a ReferenceData,
) -> Result<(&'a Medication, Schedule)> {
    let medication = reference.medication(&missed.medication)?;

    if missed.now < missed.scheduled_at {
        return Err(Error::Other(format!(
            "{} is scheduled at {}, after the current time {}",
            missed.medication, missed.scheduled_at, missed.now
        )));
    }

    let mut working = schedule.clone();
    if let Some(idx) = working.find(&medication.id, missed.scheduled_at) {
        if working.events()[idx].status == DoseStatus::Pending {
            working.mark(&medication.id, missed.scheduled_at, DoseStatus::Missed);
        }
    }

    Ok((medication, working))
}

/// Append violations whose cause is not already recorded
pub(crate) fn merge_violations(into: &mut Vec<Violation>, violations: Vec<Violation>) {
    for violation in violations {
        if !into.iter().any(|v| v.same_cause(&violation)) {
            into.push(violation);
        }
    }
}
