// Core types for the subprocess (step) lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::fields::FieldTag;
use crate::workflow::holds::HoldSlot;

pub type RequestId = String;
pub type StepId = String;
pub type UserId = String;
pub type DepartmentId = String;

/// Lifecycle status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Hold,
    Completed,
    Cancelled,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Cancelled | StepStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::NotStarted => "NOT_STARTED",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Hold => "HOLD",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Cancelled => "CANCELLED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered unit of work within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub request_id: RequestId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub order: u32,
    pub department_id: DepartmentId,
    pub status: StepStatus,
    /// Assignee, unset until resolved through assignment
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Users allowed to own this step (department + role mapping, supplied externally)
    #[serde(default)]
    pub allowed_user_ids: Vec<UserId>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_step_with_cost: bool,
    /// Smallest currency unit
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub price_set_by: Option<UserId>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hold_date_one: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hold_date_two: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hold_date_three: Option<DateTime<Utc>>,
    #[serde(default)]
    pub continue_date_one: Option<DateTime<Utc>>,
    #[serde(default)]
    pub continue_date_two: Option<DateTime<Utc>>,
    #[serde(default)]
    pub continue_date_three: Option<DateTime<Utc>>,
    /// Field tags this step declares as relevant
    #[serde(default)]
    pub check_fields: Vec<FieldTag>,
    /// Raw dynamic field values as stored; typed by the validator
    #[serde(default)]
    pub field_subprocess: BTreeMap<FieldTag, serde_json::Value>,
    #[serde(default)]
    pub is_approved: bool,
    /// Set once every predecessor has completed or been skipped
    #[serde(default)]
    pub start_eligible: bool,
    /// Reason recorded on cancel/skip
    #[serde(default)]
    pub resolution_reason: Option<String>,
    /// Store revision this snapshot was read at
    #[serde(default)]
    pub version: u64,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn hold_date(&self, slot: HoldSlot) -> Option<DateTime<Utc>> {
        match slot {
            HoldSlot::One => self.hold_date_one,
            HoldSlot::Two => self.hold_date_two,
            HoldSlot::Three => self.hold_date_three,
        }
    }

    pub fn continue_date(&self, slot: HoldSlot) -> Option<DateTime<Utc>> {
        match slot {
            HoldSlot::One => self.continue_date_one,
            HoldSlot::Two => self.continue_date_two,
            HoldSlot::Three => self.continue_date_three,
        }
    }

    /// The six hold/continue timestamps as (hold, continue) pairs in slot order
    pub fn hold_pairs(&self) -> [(Option<DateTime<Utc>>, Option<DateTime<Utc>>); 3] {
        [
            (self.hold_date_one, self.continue_date_one),
            (self.hold_date_two, self.continue_date_two),
            (self.hold_date_three, self.continue_date_three),
        ]
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Partial update sent through `UpdateStep`. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_set_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_date_one: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_date_two: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_date_three: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_date_one: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_date_two: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_date_three: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_subprocess: Option<BTreeMap<FieldTag, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_eligible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_reason: Option<String>,
}

impl StepPatch {
    pub fn set_hold_date(&mut self, slot: HoldSlot, at: DateTime<Utc>) {
        match slot {
            HoldSlot::One => self.hold_date_one = Some(at),
            HoldSlot::Two => self.hold_date_two = Some(at),
            HoldSlot::Three => self.hold_date_three = Some(at),
        }
    }

    pub fn set_continue_date(&mut self, slot: HoldSlot, at: DateTime<Utc>) {
        match slot {
            HoldSlot::One => self.continue_date_one = Some(at),
            HoldSlot::Two => self.continue_date_two = Some(at),
            HoldSlot::Three => self.continue_date_three = Some(at),
        }
    }

    /// Apply the patch to a local snapshot. Stores use this; the version is
    /// bumped by the store, not here.
    pub fn apply_to(&self, step: &mut Step) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut step.status, &self.status);
        set_opt(&mut step.user_id, &self.user_id);
        set_opt(&mut step.price, &self.price);
        set_opt(&mut step.price_set_by, &self.price_set_by);
        set_opt(&mut step.start_date, &self.start_date);
        set_opt(&mut step.end_date, &self.end_date);
        set_opt(&mut step.hold_date_one, &self.hold_date_one);
        set_opt(&mut step.hold_date_two, &self.hold_date_two);
        set_opt(&mut step.hold_date_three, &self.hold_date_three);
        set_opt(&mut step.continue_date_one, &self.continue_date_one);
        set_opt(&mut step.continue_date_two, &self.continue_date_two);
        set_opt(&mut step.continue_date_three, &self.continue_date_three);
        set(&mut step.field_subprocess, &self.field_subprocess);
        set(&mut step.is_approved, &self.is_approved);
        set(&mut step.start_eligible, &self.start_eligible);
        set_opt(&mut step.resolution_reason, &self.resolution_reason);
    }

    /// The patch as a JSON object, used as the `changes` payload of history entries
    pub fn changes(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A product-development request and its ordered step references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub step_ids: Vec<StepId>,
    pub department_id: DepartmentId,
    pub created_by: UserId,
    #[serde(default)]
    pub material_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Overall request status, derived from its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

/// Result of `GetRequestDetail`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    pub request: Request,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
    #[serde(default)]
    pub materials: Vec<CatalogEntry>,
}

impl RequestDetail {
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Steps sorted by their order index
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// The first not-yet-started step ordered after `step`
    pub fn next_step_after(&self, step: &Step) -> Option<&Step> {
        self.ordered_steps()
            .into_iter()
            .find(|s| s.order > step.order && s.status == StepStatus::NotStarted)
    }

    pub fn status(&self) -> RequestStatus {
        derive_request_status(&self.steps)
    }

    /// Replace the local copy of a step after a successful write
    pub fn replace_step(&mut self, updated: Step) {
        if let Some(slot) = self.steps.iter_mut().find(|s| s.id == updated.id) {
            *slot = updated;
        }
    }
}

/// Derive the request's overall status from its steps.
///
/// A cancelled required step cancels the request; all-terminal is completed;
/// a request whose only open work is on hold is on hold.
pub fn derive_request_status(steps: &[Step]) -> RequestStatus {
    if steps.is_empty() {
        return RequestStatus::Pending;
    }
    if steps
        .iter()
        .any(|s| s.status == StepStatus::Cancelled && s.is_required)
    {
        return RequestStatus::Cancelled;
    }
    if steps.iter().all(Step::is_terminal) {
        return RequestStatus::Completed;
    }
    let in_progress = steps.iter().any(|s| s.status == StepStatus::InProgress);
    let on_hold = steps.iter().any(|s| s.status == StepStatus::Hold);
    if on_hold && !in_progress {
        return RequestStatus::OnHold;
    }
    if in_progress || steps.iter().any(Step::is_terminal) {
        return RequestStatus::InProgress;
    }
    RequestStatus::Pending
}

/// A user from the external directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub department_id: DepartmentId,
}

/// Whoever is invoking an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

/// Uploaded media attached to a request, optionally tied to a step field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub step_id: Option<StepId>,
    #[serde(default)]
    pub field: Option<FieldTag>,
}

/// Entry of the status, material or category catalogs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

/// Audit actions recorded through `AppendHistory`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Create,
    Update,
    Delete,
    Revert,
    Complete,
    Reject,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub action: HistoryAction,
    pub entity_type: String,
    pub entity_id: String,
    pub changes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub const STEP_ENTITY: &'static str = "subprocess";

    pub fn for_step(
        step: &Step,
        actor: &Actor,
        action: HistoryAction,
        changes: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: step.request_id.clone(),
            user_id: actor.user_id.clone(),
            action,
            entity_type: Self::STEP_ENTITY.to_string(),
            entity_id: step.id.clone(),
            changes,
            timestamp,
        }
    }
}
