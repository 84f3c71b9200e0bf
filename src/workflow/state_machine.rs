// Step lifecycle state machine.
//
//   NOT_STARTED -> IN_PROGRESS -> { HOLD <-> IN_PROGRESS (bounded), COMPLETED }
//   NOT_STARTED | IN_PROGRESS | HOLD -> CANCELLED | SKIPPED
//
// Planning is pure: a plan is a patch against the exact step version that was
// read. Nothing is written here, so a rejection leaves no partial state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fields::{FieldTag, ValidationResult};
use crate::workflow::errors::{ActionKind, GuardViolation, StepError};
use crate::workflow::holds::{HoldCycleTracker, NextAction, MAX_HOLDS};
use crate::workflow::types::{Actor, HistoryAction, Step, StepId, StepPatch, StepStatus, UserId};

/// A requested lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Start,
    Hold,
    Continue,
    Complete,
    Cancel { reason: String },
    Skip { reason: String },
}

impl StepAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            StepAction::Start => ActionKind::Start,
            StepAction::Hold => ActionKind::Hold,
            StepAction::Continue => ActionKind::Continue,
            StepAction::Complete => ActionKind::Complete,
            StepAction::Cancel { .. } => ActionKind::Cancel,
            StepAction::Skip { .. } => ActionKind::Skip,
        }
    }
}

/// Inputs resolved by the caller before planning
#[derive(Debug, Clone)]
pub struct TransitionInput<'a> {
    pub actor: &'a Actor,
    pub now: DateTime<Utc>,
    /// Assignee resolved atomically as part of `start`
    pub assignee: Option<&'a UserId>,
    /// Outcome of field validation, required for `complete`
    pub validation: Option<&'a ValidationResult>,
    pub require_reason: bool,
}

impl<'a> TransitionInput<'a> {
    pub fn new(actor: &'a Actor, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            now,
            assignee: None,
            validation: None,
            require_reason: true,
        }
    }
}

/// An accepted transition, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub step_id: StepId,
    pub expected_version: u64,
    pub from: StepStatus,
    pub to: StepStatus,
    pub patch: StepPatch,
    pub history_action: HistoryAction,
    /// The next ordered step becomes eligible to start
    pub activates_successor: bool,
}

pub struct StepStateMachine;

impl StepStateMachine {
    pub fn plan(
        step: &Step,
        action: &StepAction,
        input: &TransitionInput<'_>,
    ) -> Result<TransitionPlan, StepError> {
        let result = Self::plan_inner(step, action, input);
        match &result {
            Ok(plan) => debug!(
                step.id = %step.id,
                action = %action.kind(),
                from = %plan.from,
                to = %plan.to,
                "Transition planned"
            ),
            Err(err) => warn!(
                step.id = %step.id,
                action = %action.kind(),
                status = %step.status,
                error = %err,
                "Transition rejected"
            ),
        }
        result
    }

    fn plan_inner(
        step: &Step,
        action: &StepAction,
        input: &TransitionInput<'_>,
    ) -> Result<TransitionPlan, StepError> {
        let kind = action.kind();
        Self::check(step, kind, input.actor)?;

        let now = input.now;
        let mut patch = StepPatch::default();

        let (to, history_action, activates_successor) = match action {
            StepAction::Start => {
                if step.user_id.is_none() {
                    let assignee = input.assignee.ok_or(GuardViolation::AssigneeMissing)?;
                    patch.user_id = Some(assignee.clone());
                }
                patch.start_date = Some(now);
                (StepStatus::InProgress, HistoryAction::Update, false)
            }
            StepAction::Hold => {
                let next = HoldCycleTracker::compute_hold_info(step).next_action;
                let NextAction::Hold(slot) = next else {
                    return Err(Self::sequence_violation(step, kind).into());
                };
                patch.set_hold_date(slot, now);
                (StepStatus::Hold, HistoryAction::Hold, false)
            }
            StepAction::Continue => {
                let next = HoldCycleTracker::compute_hold_info(step).next_action;
                let NextAction::Continue(slot) = next else {
                    return Err(Self::sequence_violation(step, kind).into());
                };
                patch.set_continue_date(slot, now);
                (StepStatus::InProgress, HistoryAction::Update, false)
            }
            StepAction::Complete => {
                match input.validation {
                    Some(ValidationResult::Valid(values)) => {
                        // A visible tag missing from the typed map was left blank.
                        let mut fields = step.field_subprocess.clone();
                        fields.retain(|tag, _| {
                            !step.check_fields.contains(tag) || values.contains_key(tag)
                        });
                        fields.extend(
                            values
                                .iter()
                                .map(|(tag, value)| (FieldTag::clone(tag), value.to_raw())),
                        );
                        if fields != step.field_subprocess {
                            patch.field_subprocess = Some(fields);
                        }
                    }
                    Some(ValidationResult::Invalid(failures)) => {
                        return Err(StepError::Validation(failures.clone()));
                    }
                    // Completing without having validated is never allowed.
                    None => return Err(StepError::Validation(Vec::new())),
                }
                if step.is_step_with_cost {
                    if step.price.is_none() {
                        return Err(GuardViolation::PriceMissing.into());
                    }
                    if step.price_set_by.is_none() || step.price_set_by != step.user_id {
                        return Err(GuardViolation::PriceNotSetByAssignee {
                            set_by: step.price_set_by.clone(),
                        }
                        .into());
                    }
                }
                patch.end_date = Some(now);
                (StepStatus::Completed, HistoryAction::Complete, true)
            }
            StepAction::Cancel { reason } | StepAction::Skip { reason } => {
                let reason = reason.trim();
                if reason.is_empty() && input.require_reason {
                    return Err(GuardViolation::ReasonRequired { action: kind }.into());
                }
                if !reason.is_empty() {
                    patch.resolution_reason = Some(reason.to_string());
                }
                patch.end_date = Some(now);
                if kind == ActionKind::Cancel {
                    // An optional step does not block the ones after it.
                    (StepStatus::Cancelled, HistoryAction::Reject, !step.is_required)
                } else {
                    (StepStatus::Skipped, HistoryAction::Update, true)
                }
            }
        };

        patch.status = Some(to);
        Ok(TransitionPlan {
            step_id: step.id.clone(),
            expected_version: step.version,
            from: step.status,
            to,
            patch,
            history_action,
            activates_successor,
        })
    }

    /// Status, actor and hold-budget guards. Field and cost guards of
    /// `complete` need collaborator data and are evaluated in `plan`.
    pub fn check(step: &Step, kind: ActionKind, actor: &Actor) -> Result<(), GuardViolation> {
        let illegal = || GuardViolation::IllegalTransition {
            action: kind,
            from: step.status,
        };

        match kind {
            ActionKind::Start => {
                if step.status != StepStatus::NotStarted {
                    return Err(illegal());
                }
                if !step.start_eligible {
                    return Err(GuardViolation::AwaitingPredecessor);
                }
            }
            ActionKind::Hold | ActionKind::Complete => {
                if step.status != StepStatus::InProgress {
                    return Err(illegal());
                }
                Self::check_owner(step, actor)?;
            }
            ActionKind::Continue => {
                if step.status != StepStatus::Hold {
                    return Err(illegal());
                }
                Self::check_owner(step, actor)?;
            }
            ActionKind::Cancel | ActionKind::Skip | ActionKind::Assign | ActionKind::SetPrice => {
                if step.is_terminal() {
                    return Err(illegal());
                }
            }
        }

        if matches!(kind, ActionKind::Hold | ActionKind::Continue) {
            let info = HoldCycleTracker::compute_hold_info(step);
            if !info.is_consistent() {
                return Err(GuardViolation::CorruptHoldHistory {
                    anomalies: info.anomalies,
                });
            }
            let fits = match (kind, info.next_action) {
                (ActionKind::Hold, NextAction::Hold(_)) => true,
                (ActionKind::Continue, NextAction::Continue(_)) => true,
                _ => false,
            };
            if !fits {
                return Err(Self::sequence_violation(step, kind));
            }
        }

        Ok(())
    }

    /// Lifecycle actions whose state guards currently pass for `actor`
    pub fn legal_actions(step: &Step, actor: &Actor) -> Vec<ActionKind> {
        [
            ActionKind::Start,
            ActionKind::Hold,
            ActionKind::Continue,
            ActionKind::Complete,
            ActionKind::Cancel,
            ActionKind::Skip,
        ]
        .into_iter()
        .filter(|kind| Self::check(step, *kind, actor).is_ok())
        .collect()
    }

    fn check_owner(step: &Step, actor: &Actor) -> Result<(), GuardViolation> {
        match &step.user_id {
            None => Err(GuardViolation::AssigneeMissing),
            Some(_) if actor.is_admin || step.is_assigned_to(&actor.user_id) => Ok(()),
            Some(_) => Err(GuardViolation::NotAssignee {
                actor: actor.user_id.clone(),
            }),
        }
    }

    fn sequence_violation(step: &Step, attempted: ActionKind) -> GuardViolation {
        match HoldCycleTracker::compute_hold_info(step).next_action {
            NextAction::None if attempted == ActionKind::Hold => {
                GuardViolation::HoldBudgetExhausted { max: MAX_HOLDS }
            }
            expected => GuardViolation::OutOfSequence {
                expected,
                attempted,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;
    use crate::workflow::holds::HoldSlot;
    use crate::workflow::types::fixtures::step;
    use std::collections::BTreeMap;

    fn assigned(status: StepStatus) -> Step {
        let mut s = step("s1", 1, status);
        s.user_id = Some("u1".to_string());
        s
    }

    fn apply(step: &mut Step, plan: &TransitionPlan) {
        plan.patch.apply_to(step);
        step.version += 1;
    }

    fn plan_as(s: &Step, action: &StepAction, actor: &Actor) -> Result<TransitionPlan, StepError> {
        StepStateMachine::plan(s, action, &TransitionInput::new(actor, Utc::now()))
    }

    fn guard(err: StepError) -> GuardViolation {
        match err {
            StepError::Guard(g) => g,
            other => panic!("expected guard violation, got {other:?}"),
        }
    }

    #[test]
    fn test_hold_sets_first_hold_date() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::InProgress);
        let plan = plan_as(&s, &StepAction::Hold, &actor).unwrap();
        assert_eq!(plan.to, StepStatus::Hold);
        assert_eq!(plan.history_action, HistoryAction::Hold);
        assert!(plan.patch.hold_date_one.is_some());

        apply(&mut s, &plan);
        assert_eq!(s.status, StepStatus::Hold);
        assert_eq!(
            HoldCycleTracker::compute_hold_info(&s).next_action.to_string(),
            "continue1"
        );
    }

    #[test]
    fn test_hold_rejected_when_budget_exhausted() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::InProgress);
        for _ in 0..3 {
            let hold = plan_as(&s, &StepAction::Hold, &actor).unwrap();
            apply(&mut s, &hold);
            let resume = plan_as(&s, &StepAction::Continue, &actor).unwrap();
            apply(&mut s, &resume);
        }
        assert_eq!(HoldCycleTracker::compute_hold_info(&s).next_action, NextAction::None);

        let err = plan_as(&s, &StepAction::Hold, &actor).unwrap_err();
        assert_eq!(guard(err), GuardViolation::HoldBudgetExhausted { max: 3 });
        assert!(!StepStateMachine::legal_actions(&s, &actor).contains(&ActionKind::Hold));
    }

    #[test]
    fn test_continue_requires_hold_status() {
        let actor = Actor::user("u1");
        let s = assigned(StepStatus::InProgress);
        let err = plan_as(&s, &StepAction::Continue, &actor).unwrap_err();
        assert_eq!(
            guard(err),
            GuardViolation::IllegalTransition {
                action: ActionKind::Continue,
                from: StepStatus::InProgress,
            }
        );
    }

    #[test]
    fn test_corrupt_hold_history_is_rejected() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::InProgress);
        s.hold_date_two = Some(Utc::now());
        let err = plan_as(&s, &StepAction::Hold, &actor).unwrap_err();
        assert!(matches!(guard(err), GuardViolation::CorruptHoldHistory { .. }));
    }

    #[test]
    fn test_hold_status_without_open_hold_is_out_of_sequence() {
        let actor = Actor::user("u1");
        let s = assigned(StepStatus::Hold);
        let err = plan_as(&s, &StepAction::Continue, &actor).unwrap_err();
        assert_eq!(
            guard(err),
            GuardViolation::OutOfSequence {
                expected: NextAction::Hold(HoldSlot::One),
                attempted: ActionKind::Continue,
            }
        );
    }

    #[test]
    fn test_start_assigns_atomically() {
        let actor = Actor::user("requester");
        let s = step("s1", 1, StepStatus::NotStarted);

        let err = plan_as(&s, &StepAction::Start, &actor).unwrap_err();
        assert_eq!(guard(err), GuardViolation::AssigneeMissing);

        let assignee = "u7".to_string();
        let mut input = TransitionInput::new(&actor, Utc::now());
        input.assignee = Some(&assignee);
        let plan = StepStateMachine::plan(&s, &StepAction::Start, &input).unwrap();
        assert_eq!(plan.patch.user_id.as_deref(), Some("u7"));
        assert_eq!(plan.patch.status, Some(StepStatus::InProgress));
        assert!(plan.patch.start_date.is_some());
    }

    #[test]
    fn test_start_waits_for_predecessor() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::NotStarted);
        s.start_eligible = false;
        let err = plan_as(&s, &StepAction::Start, &actor).unwrap_err();
        assert_eq!(guard(err), GuardViolation::AwaitingPredecessor);
    }

    #[test]
    fn test_only_assignee_or_admin_may_hold() {
        let s = assigned(StepStatus::InProgress);
        let stranger = Actor::user("u2");
        let err = plan_as(&s, &StepAction::Hold, &stranger).unwrap_err();
        assert_eq!(guard(err), GuardViolation::NotAssignee { actor: "u2".into() });

        let admin = Actor::admin("boss");
        assert!(plan_as(&s, &StepAction::Hold, &admin).is_ok());
    }

    #[test]
    fn test_complete_requires_valid_fields() {
        let actor = Actor::user("u1");
        let s = assigned(StepStatus::InProgress);
        let invalid = ValidationResult::Invalid(vec![]);
        let mut input = TransitionInput::new(&actor, Utc::now());
        input.validation = Some(&invalid);
        assert!(matches!(
            StepStateMachine::plan(&s, &StepAction::Complete, &input),
            Err(StepError::Validation(_))
        ));

        let input = TransitionInput::new(&actor, Utc::now());
        assert!(matches!(
            StepStateMachine::plan(&s, &StepAction::Complete, &input),
            Err(StepError::Validation(_))
        ));
    }

    #[test]
    fn test_complete_merges_typed_values_and_activates_successor() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::InProgress);
        s.field_subprocess.insert(FieldTag::from("OLD"), serde_json::json!("kept"));
        let valid = ValidationResult::Valid(BTreeMap::from([(
            FieldTag::from("QUANTITY"),
            FieldValue::Number(3.0),
        )]));
        let mut input = TransitionInput::new(&actor, Utc::now());
        input.validation = Some(&valid);

        let plan = StepStateMachine::plan(&s, &StepAction::Complete, &input).unwrap();
        assert_eq!(plan.to, StepStatus::Completed);
        assert_eq!(plan.history_action, HistoryAction::Complete);
        assert!(plan.activates_successor);
        assert!(plan.patch.end_date.is_some());
        let fields = plan.patch.field_subprocess.unwrap();
        assert_eq!(fields[&FieldTag::from("OLD")], serde_json::json!("kept"));
        assert_eq!(fields[&FieldTag::from("QUANTITY")], serde_json::json!(3));
    }

    #[test]
    fn test_complete_clears_blanked_optional_fields() {
        let actor = Actor::user("u1");
        let mut s = assigned(StepStatus::InProgress);
        s.check_fields = vec![FieldTag::from("NOTE"), FieldTag::from("QUANTITY")];
        s.field_subprocess.insert(FieldTag::from("NOTE"), serde_json::json!("old remark"));
        s.field_subprocess.insert(FieldTag::from("LEGACY"), serde_json::json!("untouched"));
        let valid = ValidationResult::Valid(BTreeMap::from([(
            FieldTag::from("QUANTITY"),
            FieldValue::Number(40.0),
        )]));
        let mut input = TransitionInput::new(&actor, Utc::now());
        input.validation = Some(&valid);

        let plan = StepStateMachine::plan(&s, &StepAction::Complete, &input).unwrap();
        let fields = plan.patch.field_subprocess.unwrap();
        assert!(!fields.contains_key(&FieldTag::from("NOTE")));
        assert_eq!(fields[&FieldTag::from("LEGACY")], serde_json::json!("untouched"));
        assert_eq!(fields[&FieldTag::from("QUANTITY")], serde_json::json!(40));
    }

    #[test]
    fn test_cost_guards_on_complete() {
        let actor = Actor::user("u1");
        let valid = ValidationResult::Valid(BTreeMap::new());
        let mut s = assigned(StepStatus::InProgress);
        s.is_step_with_cost = true;
        let mut input = TransitionInput::new(&actor, Utc::now());
        input.validation = Some(&valid);

        let err = StepStateMachine::plan(&s, &StepAction::Complete, &input).unwrap_err();
        assert_eq!(guard(err), GuardViolation::PriceMissing);

        s.price = Some(900);
        s.price_set_by = Some("previous-owner".into());
        let err = StepStateMachine::plan(&s, &StepAction::Complete, &input).unwrap_err();
        assert!(matches!(guard(err), GuardViolation::PriceNotSetByAssignee { .. }));

        s.price_set_by = Some("u1".into());
        assert!(StepStateMachine::plan(&s, &StepAction::Complete, &input).is_ok());
    }

    #[test]
    fn test_cancel_and_skip_from_any_open_state() {
        let actor = Actor::user("anyone");
        for status in [StepStatus::NotStarted, StepStatus::InProgress, StepStatus::Hold] {
            let s = assigned(status);
            let cancel = StepAction::Cancel { reason: "customer withdrew".into() };
            let plan = plan_as(&s, &cancel, &actor).unwrap();
            assert_eq!(plan.to, StepStatus::Cancelled);
            assert_eq!(plan.patch.resolution_reason.as_deref(), Some("customer withdrew"));
            assert!(!plan.activates_successor);

            let skip = StepAction::Skip { reason: "not needed".into() };
            let plan = plan_as(&s, &skip, &actor).unwrap();
            assert_eq!(plan.to, StepStatus::Skipped);
            assert!(plan.activates_successor);
        }
    }

    #[test]
    fn test_cancelling_optional_step_unblocks_successor() {
        let actor = Actor::admin("boss");
        let mut s = assigned(StepStatus::InProgress);
        s.is_required = false;
        let cancel = StepAction::Cancel {
            reason: "dropped from scope".into(),
        };

        let plan = plan_as(&s, &cancel, &actor).unwrap();
        assert_eq!(plan.to, StepStatus::Cancelled);
        assert_eq!(plan.history_action, HistoryAction::Reject);
        assert!(plan.activates_successor);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let actor = Actor::admin("boss");
        for status in [StepStatus::Completed, StepStatus::Cancelled, StepStatus::Skipped] {
            let s = assigned(status);
            assert!(StepStateMachine::legal_actions(&s, &actor).is_empty());
            let cancel = StepAction::Cancel { reason: "again".into() };
            assert!(plan_as(&s, &cancel, &actor).is_err());
        }
    }

    #[test]
    fn test_blank_reason_rejected_unless_relaxed() {
        let actor = Actor::user("u1");
        let s = assigned(StepStatus::InProgress);
        let skip = StepAction::Skip { reason: "  ".into() };
        let err = plan_as(&s, &skip, &actor).unwrap_err();
        assert_eq!(guard(err), GuardViolation::ReasonRequired { action: ActionKind::Skip });

        let mut input = TransitionInput::new(&actor, Utc::now());
        input.require_reason = false;
        let plan = StepStateMachine::plan(&s, &skip, &input).unwrap();
        assert_eq!(plan.patch.resolution_reason, None);
    }

    #[test]
    fn test_legal_actions() {
        let owner = Actor::user("u1");
        let s = assigned(StepStatus::InProgress);
        assert_eq!(
            StepStateMachine::legal_actions(&s, &owner),
            vec![ActionKind::Hold, ActionKind::Complete, ActionKind::Cancel, ActionKind::Skip]
        );

        let s = assigned(StepStatus::Hold);
        let mut s = s;
        s.hold_date_one = Some(Utc::now());
        assert_eq!(
            StepStateMachine::legal_actions(&s, &owner),
            vec![ActionKind::Continue, ActionKind::Cancel, ActionKind::Skip]
        );
    }
}
