//! Boundary to the external advisory service.
//!
//! The service receives a structured prompt and answers with a small JSON
//! document. Nothing it says is trusted: the reply is parsed strictly here and
//! re-checked by the advisory strategy before it can become a proposal.

pub mod http;

pub use http::HttpAdvisoryClient;

use crate::format::format_time_of_day;
use crate::{
    DoseStatus, FoodRequirement, Medication, MedicationId, MissedDose, ReferenceData, Schedule,
};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Why the advisory service could not be used for a decision
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("suggestion rejected: {0}")]
    Rejected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Something that can ask the advisory service for a recommendation
///
/// Implementations return the raw reply text; parsing happens in
/// [`AdvisoryReply::parse`].
pub trait AdvisoryClient: Send + Sync {
    fn advise(
        &self,
        prompt: &AdvisoryPrompt,
    ) -> impl Future<Output = std::result::Result<String, AdvisoryError>> + Send;
}

const INSTRUCTIONS: &str = "\
You help a patient decide what to do about a missed medication dose.
Reply with a single JSON object and nothing else:
{\"proposed_time\": \"HH:MM\" or null, \"skip\": true or false, \"warnings\": [\"...\"], \"reasoning\": \"...\"}
Set exactly one of proposed_time or skip. A proposed time must not be earlier than the current time
and must be earlier than the horizon. Respect every constraint listed below.";

/// A dose in the prompt's view of the day
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PromptDose {
    pub medication: MedicationId,
    pub at: NaiveDateTime,
    pub status: DoseStatus,
}

/// A constraint in the prompt, rendered to text
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PromptConstraint {
    pub kind: &'static str,
    pub rule: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Structured context sent to the advisory service
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AdvisoryPrompt {
    pub medication: MedicationId,
    pub name: String,
    pub food: FoodRequirement,
    pub scheduled_at: NaiveDateTime,
    pub now: NaiveDateTime,
    pub horizon: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub constraints: Vec<PromptConstraint>,
    pub doses: Vec<PromptDose>,
    pub meals: Vec<NaiveDateTime>,
}

impl AdvisoryPrompt {
    pub fn build(
        missed: &MissedDose,
        medication: &Medication,
        schedule: &Schedule,
        reference: &ReferenceData,
        horizon: NaiveDateTime,
    ) -> Self {
        let constraints = reference
            .constraints_for(medication)
            .map(|c| PromptConstraint {
                kind: c.kind(),
                rule: c.to_string(),
                description: c.description().to_string(),
            })
            .collect();

        let doses = schedule
            .events()
            .iter()
            .map(|e| PromptDose {
                medication: e.medication.clone(),
                at: e.at,
                status: e.status,
            })
            .collect();

        Self {
            medication: medication.id.clone(),
            name: medication.name.clone(),
            food: medication.food,
            scheduled_at: missed.scheduled_at,
            now: missed.now,
            horizon,
            reason: missed.reason.clone(),
            constraints,
            doses,
            meals: schedule.meals().to_vec(),
        }
    }

    /// Instructions followed by the context as pretty JSON
    pub fn render(&self) -> String {
        let context = serde_json::to_string_pretty(self).unwrap_or_default();
        format!(
            "{}\n\nMissed {} dose scheduled at {}; it is now {}.\n\nContext:\n{}",
            INSTRUCTIONS,
            self.name,
            format_time_of_day(self.scheduled_at.time()),
            format_time_of_day(self.now.time()),
            context
        )
    }
}

/// What the service recommends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvisoryDecision {
    Take(NaiveDateTime),
    Skip,
}

/// A parsed, not yet validated, advisory reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvisoryReply {
    pub decision: AdvisoryDecision,
    pub warnings: Vec<String>,
    pub reasoning: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReply {
    #[serde(default)]
    proposed_time: Option<String>,
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

impl AdvisoryReply {
    /// Parse reply text; a bare `HH:MM` is taken on the date of `now`
    pub fn parse(text: &str, now: NaiveDateTime) -> std::result::Result<Self, AdvisoryError> {
        let body = strip_fence(text);
        let raw: RawReply =
            serde_json::from_str(body).map_err(|e| AdvisoryError::Malformed(e.to_string()))?;

        let proposed = raw
            .proposed_time
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let decision = match (proposed, raw.skip) {
            (Some(_), true) => {
                return Err(AdvisoryError::Malformed(
                    "reply sets both proposed_time and skip".into(),
                ))
            }
            (None, false) => {
                return Err(AdvisoryError::Malformed(
                    "reply sets neither proposed_time nor skip".into(),
                ))
            }
            (Some(time), false) => AdvisoryDecision::Take(parse_reply_time(time, now)?),
            (None, true) => AdvisoryDecision::Skip,
        };

        Ok(Self {
            decision,
            warnings: raw.warnings,
            reasoning: raw.reasoning,
        })
    }
}

fn parse_reply_time(raw: &str, now: NaiveDateTime) -> std::result::Result<NaiveDateTime, AdvisoryError> {
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(at);
        }
    }
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
            return Ok(now.date().and_time(time));
        }
    }
    Err(AdvisoryError::Malformed(format!(
        "unrecognised proposed_time '{}'",
        raw
    )))
}

/// Drop a surrounding Markdown code fence, if any
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the info string ("json") on the opening line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
