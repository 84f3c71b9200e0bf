// Error taxonomy for step operations.
//
// Every variant except `Store` is a typed, recoverable rejection scoped to the
// one step operation that produced it; the stored step is untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::assignment::AssignmentError;
use crate::cost::CostError;
use crate::external::StoreError;
use crate::fields::FieldFailure;
use crate::workflow::holds::{HoldAnomaly, NextAction};
use crate::workflow::types::{RequestId, StepId, StepStatus, UserId};

/// Operations a caller can attempt on a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    Hold,
    Continue,
    Complete,
    Cancel,
    Skip,
    Assign,
    SetPrice,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Hold => "hold",
            ActionKind::Continue => "continue",
            ActionKind::Complete => "complete",
            ActionKind::Cancel => "cancel",
            ActionKind::Skip => "skip",
            ActionKind::Assign => "assign",
            ActionKind::SetPrice => "set_price",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::SetPrice => f.write_str("set the price of"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The specific guard that rejected a transition
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "guard", rename_all = "snake_case")]
pub enum GuardViolation {
    #[error("cannot {action} a step that is {from}")]
    IllegalTransition { action: ActionKind, from: StepStatus },
    #[error("step has no assignee")]
    AssigneeMissing,
    #[error("{actor} is not the assignee of this step")]
    NotAssignee { actor: UserId },
    #[error("admin privileges are required to {action} this step")]
    AdminRequired { action: ActionKind },
    #[error("step is waiting for its predecessor to finish")]
    AwaitingPredecessor,
    #[error("all {max} hold cycles have been used")]
    HoldBudgetExhausted { max: u8 },
    #[error("next hold-cycle action is {expected}, not {attempted}")]
    OutOfSequence {
        expected: NextAction,
        attempted: ActionKind,
    },
    #[error("hold history is inconsistent: {anomalies:?}")]
    CorruptHoldHistory { anomalies: Vec<HoldAnomaly> },
    #[error("a price is required before completing a cost-bearing step")]
    PriceMissing,
    #[error("price was entered by {set_by:?}, not the assignee")]
    PriceNotSetByAssignee { set_by: Option<UserId> },
    #[error("a reason is required to {action} a step")]
    ReasonRequired { action: ActionKind },
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{} field(s) failed validation: {}", .0.len(), summarize(.0))]
    Validation(Vec<FieldFailure>),
    #[error("transition rejected: {0}")]
    Guard(#[from] GuardViolation),
    #[error("assignment failed: {0}")]
    Assignment(#[from] AssignmentError),
    #[error("cost entry rejected: {0}")]
    Cost(#[from] CostError),
    #[error("step {step_id} changed since version {expected_version} was read (now {current_version:?}); re-fetch and retry")]
    ConcurrentModification {
        step_id: StepId,
        expected_version: u64,
        current_version: Option<u64>,
    },
    #[error("request {request_id} not found")]
    RequestNotFound { request_id: RequestId },
    #[error("step {step_id} not found in request {request_id}")]
    StepNotFound {
        request_id: RequestId,
        step_id: StepId,
    },
    /// Infrastructure failure from the store, passed through unmodified
    #[error(transparent)]
    Store(StoreError),
}

fn summarize(failures: &[FieldFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StepError {
    /// Everything but infrastructure failures can be fixed by the caller
    /// (correct input, re-read, wait for directory sync).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StepError::Store(_))
    }

    /// Short machine-readable category
    pub fn category(&self) -> &'static str {
        match self {
            StepError::Validation(_) => "validation_failure",
            StepError::Guard(_) => "guard_violation",
            StepError::Assignment(_) => "assignment_failure",
            StepError::Cost(CostError::UnauthorizedCostEntry { .. }) => "unauthorized_cost_entry",
            StepError::Cost(CostError::InvalidAmount { .. }) => "invalid_amount",
            StepError::Cost(_) => "cost_rejected",
            StepError::ConcurrentModification { .. } => "concurrent_modification",
            StepError::RequestNotFound { .. } | StepError::StepNotFound { .. } => "not_found",
            StepError::Store(_) => "store_failure",
        }
    }

    /// Map a store error from `UpdateStep` on `step_id`
    pub fn from_update(step_id: &str, expected_version: u64, err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { current_version } => StepError::ConcurrentModification {
                step_id: step_id.to_string(),
                expected_version,
                current_version,
            },
            other => StepError::Store(other),
        }
    }
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Store(err)
    }
}
