//! Top-level entry point: one shared reference set, one selected strategy.

use crate::advisory::HttpAdvisoryClient;
use crate::config::Config;
use crate::rules::load_reference;
use crate::strategy::{AdvisoryStrategy, RescheduleStrategy, RuleBasedStrategy};
use crate::{MissedDose, ReferenceData, RescheduleProposal, Result, Schedule, StrategyKind};
use std::sync::Arc;

/// Strategy chosen at startup
#[derive(Clone, Debug)]
pub enum SelectedStrategy {
    RuleBased(RuleBasedStrategy),
    Advisory(AdvisoryStrategy<HttpAdvisoryClient>),
}

impl SelectedStrategy {
    /// Advisory when the configured credential variable is set, rule-based otherwise
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_credential(config, config.advisory.api_key())
    }

    pub fn from_credential(config: &Config, api_key: Option<String>) -> Result<Self> {
        let rules = RuleBasedStrategy::from_config(&config.scheduling);
        match api_key {
            Some(key) => {
                let client = HttpAdvisoryClient::from_config(&config.advisory, key)?;
                tracing::info!("Using advisory strategy with model {}", client.model());
                Ok(SelectedStrategy::Advisory(
                    AdvisoryStrategy::new(client)
                        .with_fallback(rules)
                        .with_timeout(config.advisory.call_timeout()),
                ))
            }
            None => {
                tracing::info!(
                    "{} not set, using rule-based strategy",
                    config.advisory.api_key_env
                );
                Ok(SelectedStrategy::RuleBased(rules))
            }
        }
    }
}

impl RescheduleStrategy for SelectedStrategy {
    fn kind(&self) -> StrategyKind {
        match self {
            SelectedStrategy::RuleBased(s) => s.kind(),
            SelectedStrategy::Advisory(s) => s.kind(),
        }
    }

    fn propose(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal> {
        match self {
            SelectedStrategy::RuleBased(s) => s.propose(missed, schedule, reference),
            SelectedStrategy::Advisory(s) => s.propose(missed, schedule, reference),
        }
    }
}

/// Rescheduling engine shared across decisions
///
/// Cheap to clone; clones share the same reference data.
#[derive(Clone, Debug)]
pub struct Rescheduler {
    reference: Arc<ReferenceData>,
    strategy: Arc<SelectedStrategy>,
}

impl Rescheduler {
    pub fn new(reference: ReferenceData, strategy: SelectedStrategy) -> Self {
        Self {
            reference: Arc::new(reference),
            strategy: Arc::new(strategy),
        }
    }

    /// Load definitions and pick the strategy described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let reference = load_reference(&config.data)?;
        let strategy = SelectedStrategy::from_config(config)?;
        Ok(Self::new(reference, strategy))
    }

    /// Rule-based engine over the built-in catalog
    pub fn with_defaults() -> Self {
        Self::new(
            crate::build_default_reference(),
            SelectedStrategy::RuleBased(RuleBasedStrategy::default()),
        )
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Decide what to do about `missed`
    pub fn reschedule(&self, missed: &MissedDose, schedule: &Schedule) -> Result<RescheduleProposal> {
        tracing::info!(
            "Rescheduling {} (scheduled {}, now {}) with {} strategy",
            missed.medication,
            missed.scheduled_at,
            missed.now,
            self.strategy.kind()
        );
        self.strategy.propose(missed, schedule, &self.reference)
    }
}

impl RescheduleStrategy for Rescheduler {
    fn kind(&self) -> StrategyKind {
        self.strategy_kind()
    }

    /// Uses the given reference data instead of the engine's own
    fn propose(
        &self,
        missed: &MissedDose,
        schedule: &Schedule,
        reference: &ReferenceData,
    ) -> Result<RescheduleProposal> {
        self.strategy.propose(missed, schedule, reference)
    }
}
