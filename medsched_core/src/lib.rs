#![forbid(unsafe_code)]

//! Core domain model and decision logic for missed-dose rescheduling.
//!
//! This crate provides:
//! - Domain types (medications, constraints, schedules, proposals)
//! - Rule and medication definition loading
//! - Constraint evaluation and candidate generation
//! - Rule-based and advisory rescheduling strategies

pub mod types;
pub mod error;
pub mod format;
pub mod rules;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod evaluator;
pub mod candidates;
pub mod advisory;
pub mod strategy;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_reference, get_default_reference};
pub use config::Config;
pub use evaluator::{evaluate, Conflict, Evaluation, MealSource, Violation};
pub use candidates::{generate, horizon, CandidatePolicy, Candidates};
pub use advisory::{AdvisoryClient, AdvisoryError, AdvisoryPrompt, HttpAdvisoryClient};
pub use strategy::{AdvisoryStrategy, RescheduleStrategy, RuleBasedStrategy};
pub use engine::{Rescheduler, SelectedStrategy};
pub use rules::{load_reference, MedicationFile, RuleFile};
