//! Advisory strategy: ask the external service, then verify its answer.
//!
//! ## Acceptance Rules
//!
//! A proposed time is accepted only if it lies in `[now, horizon)` and the
//! constraint evaluator finds no violation at that time. A skip is accepted
//! only when the rule-based search finds no feasible time, shifts included.
//! Anything else (timeout, transport
//! failure, bad status, unparseable reply, rejected suggestion, cancellation)
//! resolves to the rule-based proposal with a note naming the cause.

use super::{prepare, RescheduleStrategy, RuleBasedStrategy};
use crate::advisory::{AdvisoryClient, AdvisoryDecision, AdvisoryError, AdvisoryPrompt, AdvisoryReply};
use crate::candidates::horizon;
use crate::evaluator::evaluate;
use crate::format::format_time_of_day;
use crate::{
    Action, Medication, MissedDose, ReferenceData, RescheduleProposal, Result, Schedule,
    StrategyKind,
};
use chrono::NaiveDateTime;
use std::future::Future;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Strategy that consults an [`AdvisoryClient`] and falls back to rules
#[derive(Clone, Debug)]
pub struct AdvisoryStrategy<C> {
    client: C,
    fallback: RuleBasedStrategy,
    timeout: Duration,
}

impl<C: AdvisoryClient> AdvisoryStrategy<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            fallback: RuleBasedStrategy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_fallback(mut self, fallback: RuleBasedStrategy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn fallback(&self) -> &RuleBasedStrategy {
        &self.fallback
    }

    /// Async form of [`RescheduleStrategy::propose`]
    pub async fn propose_async(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal> {
        self.propose_with_cancel(missed, schedule, reference, std::future::pending())
            .await
    }

    /// Like [`Self::propose_async`], abandoning the advisory call once
    /// `cancel` completes
    pub async fn propose_with_cancel<F>(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
        cancel: F,
    ) -> Result<RescheduleProposal>
    where
        F: Future<Output = ()>,
    {
        let (medication, working) = prepare(missed, schedule, reference)?;
        let horizon = horizon(missed, &working, self.fallback.policy());
        let prompt = AdvisoryPrompt::build(missed, medication, &working, reference, horizon);

        let reply = tokio::select! {
            biased;
            _ = cancel => Err(AdvisoryError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.client.advise(&prompt)) => {
                result.unwrap_or(Err(AdvisoryError::Timeout(self.timeout)))
            }
        };

        let outcome = reply
            .and_then(|text| AdvisoryReply::parse(&text, missed.now))
            .and_then(|reply| self.accept(missed, medication, &working, reference, horizon, reply));

        match outcome {
            Ok(proposal) => {
                tracing::info!(
                    "Advisory: accepted {:?} for {}",
                    proposal.action,
                    medication.id
                );
                Ok(proposal)
            }
            Err(cause) => self.fall_back(missed, schedule, reference, cause),
        }
    }

    fn accept(
        &self,
        missed: &MissedDose,
        medication: &Medication,
        schedule: &Schedule,
        reference: &ReferenceData,
        horizon: NaiveDateTime,
        reply: AdvisoryReply,
    ) -> std::result::Result<RescheduleProposal, AdvisoryError> {
        match reply.decision {
            AdvisoryDecision::Take(at) => {
                if at < missed.now {
                    return Err(AdvisoryError::Rejected(format!(
                        "{} is before the current time",
                        format_time_of_day(at.time())
                    )));
                }
                if at >= horizon {
                    return Err(AdvisoryError::Rejected(format!(
                        "{} is not before {}",
                        at, horizon
                    )));
                }
                let evaluation = evaluate(at, medication, schedule, reference);
                if let Some(violation) = evaluation.violations.first() {
                    return Err(AdvisoryError::Rejected(format!(
                        "{} violates {}",
                        format_time_of_day(at.time()),
                        violation
                    )));
                }

                let mut warnings = self
                    .fallback
                    .standing_warnings(missed, medication, reference, at);
                for warning in reply.warnings {
                    if !warnings.contains(&warning) {
                        warnings.push(warning);
                    }
                }

                Ok(RescheduleProposal {
                    missed: missed.clone(),
                    action: if at == missed.now {
                        Action::TakeNow
                    } else {
                        Action::TakeAt(at)
                    },
                    adjustments: Vec::new(),
                    warnings,
                    violations: Vec::new(),
                    strategy: StrategyKind::Advisory,
                    reasoning: reply.reasoning,
                })
            }

            AdvisoryDecision::Skip => {
                let violations = match self.fallback.resolve(missed, medication, schedule, reference)
                {
                    Ok((at, adjustments)) => {
                        return Err(AdvisoryError::Rejected(format!(
                            "skip suggested but {} is feasible with {} adjustment(s)",
                            format_time_of_day(at.time()),
                            adjustments.len()
                        )));
                    }
                    Err(violations) => violations,
                };

                let mut warnings = reply.warnings;
                warnings.extend(violations.iter().map(|v| format!("Unresolved: {}", v)));

                Ok(RescheduleProposal {
                    missed: missed.clone(),
                    action: Action::Skip,
                    adjustments: Vec::new(),
                    warnings,
                    violations,
                    strategy: StrategyKind::Advisory,
                    reasoning: reply.reasoning,
                })
            }
        }
    }

    fn fall_back(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
        cause: AdvisoryError,
    ) -> Result<RescheduleProposal> {
        tracing::warn!(
            "Advisory recommendation for {} unavailable ({}); falling back to rules",
            missed.medication,
            cause
        );
        let mut proposal = self.fallback.propose(missed, schedule, reference)?;
        proposal.warnings.push(format!(
            "Advisory recommendation unavailable ({}); using rule-based schedule",
            cause
        ));
        Ok(proposal)
    }
}

impl<C: AdvisoryClient> RescheduleStrategy for AdvisoryStrategy<C> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Advisory
    }

    fn propose(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal> {
        match block_on(self.propose_async(missed, schedule, reference)) {
            Ok(result) => result,
            Err(cause) => self.fall_back(missed, schedule, reference, cause),
        }
    }
}

/// Drive `future` to completion on a private runtime
///
/// Blocking inside a running runtime panics, so in that case the private
/// runtime lives on a scoped thread.
fn block_on<F>(future: F) -> std::result::Result<F::Output, AdvisoryError>
where
    F: Future + Send,
    F::Output: Send,
{
    let run = move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(|runtime| runtime.block_on(future))
            .map_err(|e| AdvisoryError::Runtime(e.to_string()))
    };

    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::scope(|scope| scope.spawn(run).join())
            .map_err(|_| AdvisoryError::Runtime("advisory thread panicked".into()))?
    } else {
        run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_default_reference, DoseEvent, DoseStatus};
    use chrono::NaiveDate;

    struct Fixed(std::result::Result<String, AdvisoryError>);

    impl AdvisoryClient for Fixed {
        fn advise(
            &self,
            _prompt: &AdvisoryPrompt,
        ) -> impl Future<Output = std::result::Result<String, AdvisoryError>> + Send {
            let reply = self.0.clone();
            async move { reply }
        }
    }

    struct Slow;

    impl AdvisoryClient for Slow {
        fn advise(
            &self,
            _prompt: &AdvisoryPrompt,
        ) -> impl Future<Output = std::result::Result<String, AdvisoryError>> + Send {
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(r#"{"skip": true}"#.to_string())
            }
        }
    }

    fn replying(text: &str) -> AdvisoryStrategy<Fixed> {
        AdvisoryStrategy::new(Fixed(Ok(text.to_string())))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    /// Missed levothyroxine with metformin at breakfast
    fn morning() -> (ReferenceData, Schedule, MissedDose) {
        let reference = build_default_reference();
        let schedule = Schedule::nominal(&reference, day(), 1);
        let missed = MissedDose::new("levothyroxine", at(6, 0), at(8, 0));
        (reference, schedule, missed)
    }

    /// Blood pressure dose an hour late, nothing in the way
    fn unconstrained() -> (ReferenceData, Schedule, MissedDose) {
        let reference = build_default_reference();
        let schedule = Schedule::from_events(vec![DoseEvent::pending("lisinopril", at(9, 0))]);
        let missed = MissedDose::new("lisinopril", at(9, 0), at(10, 0));
        (reference, schedule, missed)
    }

    /// Late-evening metformin with the next dose early next morning
    fn late_evening() -> (ReferenceData, Schedule, MissedDose) {
        let reference = build_default_reference();
        let schedule = Schedule::from_events(vec![
            DoseEvent::new("metformin", at(21, 0), DoseStatus::Missed),
            DoseEvent::pending("metformin", at(7, 0) + chrono::Duration::days(1)),
        ]);
        let missed = MissedDose::new("metformin", at(21, 0), at(23, 30));
        (reference, schedule, missed)
    }

    #[tokio::test]
    async fn test_failing_service_matches_rule_based() {
        let (reference, schedule, missed) = morning();
        let strategy = AdvisoryStrategy::new(Fixed(Err(AdvisoryError::Transport(
            "connection refused".into(),
        ))));

        let expected = RuleBasedStrategy::default()
            .propose(&missed, &schedule, &reference)
            .unwrap();
        let proposal = strategy
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert_eq!(proposal.action, expected.action);
        assert_eq!(proposal.adjustments, expected.adjustments);
        assert_eq!(proposal.violations, expected.violations);
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert_eq!(
            &proposal.warnings[..expected.warnings.len()],
            &expected.warnings[..]
        );
        assert_eq!(proposal.warnings.len(), expected.warnings.len() + 1);
        assert!(proposal
            .warnings
            .last()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let (reference, schedule, missed) = unconstrained();
        let strategy = AdvisoryStrategy::new(Slow).with_timeout(Duration::from_millis(20));

        let proposal = strategy
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert_eq!(proposal.action, Action::TakeAt(at(10, 0)));
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert!(proposal.warnings.last().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_accepts_valid_time() {
        let (reference, schedule, missed) = unconstrained();
        let strategy = replying(
            r#"{"proposed_time": "10:30", "skip": false, "warnings": ["Take with water"], "reasoning": "Half an hour is fine."}"#,
        );

        let proposal = strategy
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert_eq!(proposal.action, Action::TakeAt(at(10, 30)));
        assert_eq!(proposal.strategy, StrategyKind::Advisory);
        assert!(proposal.warnings.contains(&"Take with water".to_string()));
        assert_eq!(proposal.reasoning, "Half an hour is fine.");
    }

    #[tokio::test]
    async fn test_current_time_becomes_take_now() {
        let (reference, schedule, missed) = unconstrained();
        let proposal = replying(r#"{"proposed_time": "10:00", "skip": false}"#)
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();
        assert_eq!(proposal.action, Action::TakeNow);
    }

    #[tokio::test]
    async fn test_unsafe_time_is_discarded() {
        let (reference, schedule, missed) = morning();
        let proposal = replying(r#"{"proposed_time": "08:00", "skip": false}"#)
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        // metformin's breakfast is still at 08:00 without the shift
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert_eq!(proposal.adjustments.len(), 1);
        assert!(proposal.warnings.last().unwrap().contains("violates"));
    }

    #[tokio::test]
    async fn test_time_outside_window_is_discarded() {
        let (reference, schedule, missed) = unconstrained();
        for reply in [
            r#"{"proposed_time": "09:30", "skip": false}"#,
            r#"{"proposed_time": "2024-03-02T08:00", "skip": false}"#,
        ] {
            let proposal = replying(reply)
                .propose_async(&missed, &schedule, &reference)
                .await
                .unwrap();
            assert_eq!(proposal.strategy, StrategyKind::RuleBased, "{}", reply);
        }
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back() {
        let (reference, schedule, missed) = unconstrained();
        let proposal = replying("You should probably take it now.")
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert!(proposal.warnings.last().unwrap().contains("malformed reply"));
    }

    #[tokio::test]
    async fn test_needless_skip_is_discarded() {
        let (reference, schedule, missed) = unconstrained();
        let proposal = replying(r#"{"proposed_time": null, "skip": true}"#)
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert_eq!(proposal.action, Action::TakeAt(at(10, 0)));
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
    }

    #[tokio::test]
    async fn test_skip_discarded_when_a_shift_clears_the_way() {
        let (reference, schedule, missed) = morning();
        let proposal = replying(r#"{"proposed_time": null, "skip": true}"#)
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        // every time before 08:30 is blocked by breakfast unless metformin moves
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert_eq!(proposal.action, Action::TakeAt(at(8, 0)));
        assert_eq!(proposal.adjustments.len(), 1);
        let note = proposal.warnings.last().unwrap();
        assert!(note.contains("skip suggested") && note.contains("08:00"), "{}", note);
    }

    #[tokio::test]
    async fn test_justified_skip_is_accepted() {
        let (reference, schedule, missed) = late_evening();
        let proposal = replying(r#"{"proposed_time": null, "skip": true, "reasoning": "Too close to the morning dose."}"#)
            .propose_async(&missed, &schedule, &reference)
            .await
            .unwrap();

        assert!(proposal.is_skip());
        assert_eq!(proposal.strategy, StrategyKind::Advisory);
        assert_eq!(proposal.violations.len(), 1);
        assert!(proposal.violations[0].to_string().contains("07:00"));
    }

    #[tokio::test]
    async fn test_cancellation_resolves_to_rule_based() {
        let (reference, schedule, missed) = unconstrained();
        let proposal = AdvisoryStrategy::new(Slow)
            .propose_with_cancel(&missed, &schedule, &reference, std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(proposal.action, Action::TakeAt(at(10, 0)));
        assert_eq!(proposal.strategy, StrategyKind::RuleBased);
        assert!(proposal.warnings.last().unwrap().contains("cancelled"));
    }

    #[test]
    fn test_sync_propose_outside_runtime() {
        let (reference, schedule, missed) = unconstrained();
        let strategy = replying(r#"{"proposed_time": "10:15", "skip": false}"#);

        let proposal = strategy.propose(&missed, &schedule, &reference).unwrap();
        assert_eq!(proposal.action, Action::TakeAt(at(10, 15)));
        assert_eq!(strategy.kind(), StrategyKind::Advisory);
    }

    #[tokio::test]
    async fn test_sync_propose_inside_runtime() {
        let (reference, schedule, missed) = unconstrained();
        let strategy = replying(r#"{"proposed_time": "10:15", "skip": false}"#);

        let proposal = strategy.propose(&missed, &schedule, &reference).unwrap();
        assert_eq!(proposal.action, Action::TakeAt(at(10, 15)));
        assert_eq!(proposal.strategy, StrategyKind::Advisory);
    }
}
