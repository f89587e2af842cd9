//! Candidate reschedule times for a missed dose.
//!
//! Candidates start at "now" and advance in fixed steps until the horizon:
//! the next pending dose of the same medication or the coming midnight,
//! whichever is sooner. The sequence is finite and restartable (`Clone`).

use crate::{MissedDose, Schedule};
use chrono::{Duration, NaiveDateTime};

/// Tunables for candidate generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidatePolicy {
    /// Spacing between successive candidates
    pub step: Duration,
    /// Optional cap on how late after the scheduled time a dose may be taken
    pub max_delay: Option<Duration>,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            step: Duration::minutes(15),
            max_delay: None,
        }
    }
}

/// Latest instant (exclusive) at which the missed dose may still be taken
pub fn horizon(missed: &MissedDose, schedule: &Schedule, policy: &CandidatePolicy) -> NaiveDateTime {
    let mut horizon = missed
        .now
        .date()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX);

    if let Some(next) = schedule.next_pending_after(&missed.medication, missed.scheduled_at) {
        horizon = horizon.min(next.at);
    }

    if let Some(limit) = policy
        .max_delay
        .and_then(|d| missed.scheduled_at.checked_add_signed(d))
    {
        horizon = horizon.min(limit);
    }

    horizon
}

/// Candidate times for `missed`, ascending from `missed.now`
pub fn generate(missed: &MissedDose, schedule: &Schedule, policy: &CandidatePolicy) -> Candidates {
    let horizon = horizon(missed, schedule, policy);
    let candidates = Candidates::new(missed.now, horizon, policy.step);
    if candidates.is_exhausted() {
        tracing::info!(
            "No candidates for {}: now {} is not before horizon {}",
            missed.medication,
            missed.now,
            horizon
        );
    }
    candidates
}

/// Ascending candidate times in `[start, horizon)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidates {
    next: Option<NaiveDateTime>,
    horizon: NaiveDateTime,
    step: Duration,
}

impl Candidates {
    pub fn new(start: NaiveDateTime, horizon: NaiveDateTime, step: Duration) -> Self {
        Self {
            next: Some(start),
            horizon,
            step,
        }
    }

    pub fn horizon(&self) -> NaiveDateTime {
        self.horizon
    }

    /// True when no candidate remains
    pub fn is_exhausted(&self) -> bool {
        self.next.map_or(true, |t| t >= self.horizon)
    }
}

impl Iterator for Candidates {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.filter(|t| *t < self.horizon)?;
        self.next = if self.step > Duration::zero() {
            current.checked_add_signed(self.step)
        } else {
            None
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DoseEvent, DoseStatus};
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_first_candidate_is_now() {
        let missed = MissedDose::new("lisinopril", at(9, 0), at(10, 0));
        let first = generate(&missed, &Schedule::new(), &CandidatePolicy::default()).next();
        assert_eq!(first, Some(at(10, 0)));
    }

    #[test]
    fn test_stops_before_next_dose() {
        let schedule = Schedule::from_events(vec![
            DoseEvent::new("metformin", at(8, 0), DoseStatus::Missed),
            DoseEvent::pending("metformin", at(9, 0)),
        ]);
        let missed = MissedDose::new("metformin", at(8, 0), at(8, 20));

        let times: Vec<_> = generate(&missed, &schedule, &CandidatePolicy::default()).collect();
        assert_eq!(times, vec![at(8, 20), at(8, 35), at(8, 50)]);
    }

    #[test]
    fn test_stops_at_midnight() {
        let missed = MissedDose::new("metformin", at(21, 0), at(23, 30));
        let times: Vec<_> = generate(&missed, &Schedule::new(), &CandidatePolicy::default()).collect();
        assert_eq!(times, vec![at(23, 30), at(23, 45)]);
    }

    #[test]
    fn test_empty_past_horizon() {
        let schedule = Schedule::from_events(vec![
            DoseEvent::new("levothyroxine", at(6, 0), DoseStatus::Missed),
            DoseEvent::pending("levothyroxine", at(7, 0)),
        ]);
        let missed = MissedDose::new("levothyroxine", at(6, 0), at(8, 0));

        let mut candidates = generate(&missed, &schedule, &CandidatePolicy::default());
        assert!(candidates.is_exhausted());
        assert_eq!(candidates.next(), None);
    }

    #[test]
    fn test_max_delay_caps_horizon() {
        let policy = CandidatePolicy {
            max_delay: Some(Duration::hours(2)),
            ..CandidatePolicy::default()
        };
        let missed = MissedDose::new("lisinopril", at(9, 0), at(10, 30));
        assert_eq!(horizon(&missed, &Schedule::new(), &policy), at(11, 0));
        assert_eq!(generate(&missed, &Schedule::new(), &policy).count(), 2);
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let missed = MissedDose::new("lisinopril", at(9, 0), at(22, 0));
        let candidates = generate(&missed, &Schedule::new(), &CandidatePolicy::default());

        let first: Vec<_> = candidates.clone().collect();
        let second: Vec<_> = candidates.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }
}
