//! [`Outcome`]: the tagged result a handler produces for a finished stage.
//!
//! Outcomes drive both edge selection (§4.D) and retry behaviour (§4.G);
//! they are the only channel through which a handler talks back to the
//! engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The status a handler reports for one attempt at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl OutcomeStatus {
    /// Lowercased status string, as mirrored into context under the
    /// `outcome` key (§4.G context mirroring).
    pub fn as_context_value(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Retry => "retry",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
        }
    }
}

/// The full result of one handler attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Option<OutcomeStatus>,
    pub preferred_label: Option<String>,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: Some(OutcomeStatus::Success),
            ..Default::default()
        }
    }

    pub fn partial_success() -> Self {
        Self {
            status: Some(OutcomeStatus::PartialSuccess),
            ..Default::default()
        }
    }

    pub fn retry() -> Self {
        Self {
            status: Some(OutcomeStatus::Retry),
            ..Default::default()
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: Some(OutcomeStatus::Fail),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: Some(OutcomeStatus::Skipped),
            ..Default::default()
        }
    }

    pub fn with_preferred_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    pub fn with_suggested_next_ids(mut self, ids: Vec<String>) -> Self {
        self.suggested_next_ids = ids;
        self
    }

    pub fn with_context_update(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    /// True for statuses goal-gate enforcement accepts (§4.G terminal node
    /// handling): SUCCESS or PARTIAL_SUCCESS.
    pub fn satisfies_goal_gate(&self) -> bool {
        matches!(
            self.status,
            Some(OutcomeStatus::Success) | Some(OutcomeStatus::PartialSuccess)
        )
    }
}
