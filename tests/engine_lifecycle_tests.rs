//! End-to-end step lifecycle through the engine over the in-memory backend

mod support;

use async_trait::async_trait;
use prodflow::external::{RequestStore, StoreError};
use prodflow::workflow::{
    Collaborators, GuardViolation, HistoryAction, NextAction, RequestDetail, RequestId,
    RequestStatus, StepPatch,
};
use prodflow::{
    Actor, AssignmentError, AssignmentMode, CostError, FieldTag, InMemoryStore, Step, StepError,
    StepStatus,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use support::{engine_over, sample_store, APPROVAL, COSTING, DESIGN, REQUEST};

fn design_fields() -> BTreeMap<FieldTag, Value> {
    BTreeMap::from([
        (FieldTag::from("FABRIC"), json!("mat-linen")),
        (FieldTag::from("SIZES"), json!(["S", "M", "L"])),
    ])
}

fn guard(err: StepError) -> GuardViolation {
    match err {
        StepError::Guard(g) => g,
        other => panic!("expected guard violation, got {other:?}"),
    }
}

async fn stored_step(store: &InMemoryStore, id: &str) -> Step {
    store
        .snapshot()
        .await
        .steps
        .into_iter()
        .find(|s| s.id == id)
        .unwrap()
}

#[tokio::test]
async fn test_design_step_full_lifecycle() {
    let store = sample_store();
    let engine = engine_over(store.clone());

    let started = engine.start(REQUEST, DESIGN, &Actor::user("dario")).await.unwrap();
    let owner = started.step.user_id.clone().unwrap();
    assert!(owner == "ana" || owner == "bruno");
    assert_eq!(started.to, StepStatus::InProgress);
    assert_eq!(started.request_status, RequestStatus::InProgress);
    let owner = Actor::user(owner);

    let held = engine.hold(REQUEST, DESIGN, &owner).await.unwrap();
    assert_eq!(held.to, StepStatus::Hold);
    let info = engine.hold_info(REQUEST, DESIGN).await.unwrap();
    assert_eq!(info.hold_count, 1);
    assert_eq!(info.continue_count, 0);
    assert!(matches!(info.next_action, NextAction::Continue(_)));

    engine.resume(REQUEST, DESIGN, &owner).await.unwrap();

    let done = engine
        .complete(REQUEST, DESIGN, &owner, design_fields())
        .await
        .unwrap();
    assert_eq!(done.to, StepStatus::Completed);
    assert_eq!(done.activated_successor.as_deref(), Some(COSTING));
    assert_eq!(
        done.step.field_subprocess[&FieldTag::from("SAMPLE_MEDIA_LINK")],
        json!(["https://files.example/req-100/sample-front.jpg"])
    );
    assert_eq!(done.step.field_subprocess[&FieldTag::from("SIZES")], json!(["S", "M", "L"]));
    assert!(done.step.end_date.is_some());

    assert!(stored_step(&store, COSTING).await.start_eligible);

    let history = store.snapshot().await.history;
    let actions: Vec<HistoryAction> = history.iter().map(|h| h.action).collect();
    assert_eq!(
        actions,
        vec![
            HistoryAction::Update,
            HistoryAction::Hold,
            HistoryAction::Update,
            HistoryAction::Complete,
            HistoryAction::Update,
        ]
    );
    assert!(history.iter().all(|h| h.entity_type == "subprocess"));
}

#[tokio::test]
async fn test_fourth_hold_is_rejected() {
    let store = sample_store();
    let engine = engine_over(store.clone());
    let owner = Actor::user(
        engine
            .start(REQUEST, DESIGN, &Actor::user("ana"))
            .await
            .unwrap()
            .step
            .user_id
            .unwrap(),
    );

    for _ in 0..3 {
        engine.hold(REQUEST, DESIGN, &owner).await.unwrap();
        engine.resume(REQUEST, DESIGN, &owner).await.unwrap();
    }

    let info = engine.hold_info(REQUEST, DESIGN).await.unwrap();
    assert_eq!(info.hold_count, 3);
    assert_eq!(info.continue_count, 3);
    assert_eq!(info.next_action, NextAction::None);

    let before = stored_step(&store, DESIGN).await;
    let err = engine.hold(REQUEST, DESIGN, &owner).await.unwrap_err();
    assert_eq!(guard(err), GuardViolation::HoldBudgetExhausted { max: 3 });
    assert_eq!(stored_step(&store, DESIGN).await, before);
}

#[tokio::test]
async fn test_successor_waits_for_predecessor() {
    let engine = engine_over(sample_store());
    let err = engine
        .start(REQUEST, COSTING, &Actor::user("carla"))
        .await
        .unwrap_err();
    assert_eq!(guard(err), GuardViolation::AwaitingPredecessor);
}

#[tokio::test]
async fn test_invalid_fields_leave_step_untouched() {
    let store = sample_store();
    let engine = engine_over(store.clone());
    let owner = Actor::user(
        engine
            .start(REQUEST, DESIGN, &Actor::user("ana"))
            .await
            .unwrap()
            .step
            .user_id
            .unwrap(),
    );
    let before = stored_step(&store, DESIGN).await;

    let submitted = BTreeMap::from([
        (FieldTag::from("FABRIC"), json!("mat-silk")),
        (FieldTag::from("SIZES"), json!([])),
    ]);
    let err = engine
        .complete(REQUEST, DESIGN, &owner, submitted)
        .await
        .unwrap_err();

    let StepError::Validation(failures) = err else {
        panic!("expected validation failure");
    };
    let tags: Vec<&str> = failures.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(tags, vec!["FABRIC", "SIZES"]);
    assert_eq!(stored_step(&store, DESIGN).await, before);
}

#[tokio::test]
async fn test_cost_bearing_step_needs_price_from_assignee() {
    let store = sample_store();
    let engine = engine_over(store.clone());

    let design_owner = Actor::user(
        engine
            .start(REQUEST, DESIGN, &Actor::user("ana"))
            .await
            .unwrap()
            .step
            .user_id
            .unwrap(),
    );
    engine
        .complete(REQUEST, DESIGN, &design_owner, design_fields())
        .await
        .unwrap();

    let started = engine.start(REQUEST, COSTING, &Actor::user("carla")).await.unwrap();
    assert_eq!(started.step.user_id.as_deref(), Some("carla"));
    let carla = Actor::user("carla");

    let err = engine
        .complete(REQUEST, COSTING, &carla, BTreeMap::new())
        .await
        .unwrap_err();
    assert_eq!(guard(err), GuardViolation::PriceMissing);

    let err = engine
        .set_price(REQUEST, COSTING, &Actor::admin("dario"), 12_500)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StepError::Cost(CostError::UnauthorizedCostEntry { .. })
    ));
    assert_eq!(err.category(), "unauthorized_cost_entry");

    let err = engine
        .set_price(REQUEST, COSTING, &carla, -5)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::Cost(CostError::InvalidAmount { amount: -5 })));

    let priced = engine.set_price(REQUEST, COSTING, &carla, 12_500).await.unwrap();
    assert_eq!(priced.step.price, Some(12_500));
    assert_eq!(priced.step.price_set_by.as_deref(), Some("carla"));

    let done = engine
        .complete(REQUEST, COSTING, &carla, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(done.activated_successor.as_deref(), Some(APPROVAL));

    // Only dario of the allowed users exists in the directory
    let approval = engine.start(REQUEST, APPROVAL, &Actor::user("dario")).await.unwrap();
    assert_eq!(approval.step.user_id.as_deref(), Some("dario"));

    let skipped = engine
        .skip(REQUEST, APPROVAL, &Actor::user("dario"), "approved offline")
        .await
        .unwrap();
    assert_eq!(skipped.to, StepStatus::Skipped);
    assert_eq!(skipped.step.resolution_reason.as_deref(), Some("approved offline"));
    assert_eq!(skipped.request_status, RequestStatus::Completed);
}

#[tokio::test]
async fn test_cancel_requires_reason_and_cancels_request() {
    let store = sample_store();
    let engine = engine_over(store.clone());
    let anyone = Actor::user("bruno");

    let err = engine.cancel(REQUEST, DESIGN, &anyone, "  ").await.unwrap_err();
    assert!(matches!(guard(err), GuardViolation::ReasonRequired { .. }));

    let cancelled = engine
        .cancel(REQUEST, DESIGN, &anyone, "collection dropped")
        .await
        .unwrap();
    assert_eq!(cancelled.to, StepStatus::Cancelled);
    assert_eq!(cancelled.activated_successor, None);
    assert_eq!(cancelled.request_status, RequestStatus::Cancelled);
    assert_eq!(cancelled.history.action, HistoryAction::Reject);

    let err = engine.start(REQUEST, DESIGN, &anyone).await.unwrap_err();
    assert!(matches!(
        guard(err),
        GuardViolation::IllegalTransition {
            from: StepStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancelling_optional_step_hands_over_to_successor() {
    let mut snapshot = support::sample_snapshot();
    for step in snapshot.steps.iter_mut().filter(|s| s.id == COSTING) {
        step.is_required = false;
    }
    let store = Arc::new(InMemoryStore::new(snapshot));
    let engine = engine_over(store.clone());

    let cancelled = engine
        .cancel(REQUEST, COSTING, &Actor::admin("lead"), "priced by supplier")
        .await
        .unwrap();
    assert_eq!(cancelled.to, StepStatus::Cancelled);
    assert_eq!(cancelled.activated_successor.as_deref(), Some(APPROVAL));
    assert_ne!(cancelled.request_status, RequestStatus::Cancelled);
    assert!(stored_step(&store, APPROVAL).await.start_eligible);

    let started = engine.start(REQUEST, APPROVAL, &Actor::user("dario")).await.unwrap();
    assert_eq!(started.to, StepStatus::InProgress);
}

#[tokio::test]
async fn test_manual_assignment_rules() {
    let engine = engine_over(sample_store());

    let err = engine
        .assign(
            REQUEST,
            DESIGN,
            &Actor::user("ana"),
            AssignmentMode::Manual {
                user_id: "bruno".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(guard(err), GuardViolation::AdminRequired { .. }));

    let admin = Actor::admin("dario");
    let err = engine
        .assign(
            REQUEST,
            DESIGN,
            &admin,
            AssignmentMode::Manual {
                user_id: "carla".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StepError::Assignment(AssignmentError::NotInDepartment { .. })
    ));

    let assigned = engine
        .assign(
            REQUEST,
            DESIGN,
            &admin,
            AssignmentMode::Manual {
                user_id: "bruno".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(assigned.step.user_id.as_deref(), Some("bruno"));
    assert_eq!(assigned.assignee.full_name, "Bruno Sato");

    // An already-owned step keeps its assignee on start
    let started = engine.start(REQUEST, DESIGN, &Actor::user("ana")).await.unwrap();
    assert_eq!(started.step.user_id.as_deref(), Some("bruno"));
}

#[tokio::test]
async fn test_describe_resolves_visible_fields() {
    let engine = engine_over(sample_store());
    let view = engine
        .describe(REQUEST, DESIGN, &Actor::user("ana"))
        .await
        .unwrap();

    let tags: Vec<&str> = view.fields.iter().map(|f| f.definition.tag.as_str()).collect();
    assert_eq!(tags, vec!["FABRIC", "SAMPLE_MEDIA_LINK", "SIZES"]);

    let fabric = &view.fields[0];
    let values: Vec<&str> = fabric.options.iter().map(|o| o.value.as_str()).collect();
    assert_eq!(values, vec!["mat-linen", "mat-cotton"]);
    assert_eq!(fabric.options[0].label, "Linen");

    assert_eq!(view.request_status, RequestStatus::Pending);
    assert_eq!(view.hold_info.next_action, NextAction::Hold(prodflow::workflow::HoldSlot::One));
}

/// Serves a frozen request detail while writes go to the live store
struct StaleReads {
    live: Arc<InMemoryStore>,
    frozen: RequestDetail,
}

#[async_trait]
impl RequestStore for StaleReads {
    async fn get_request_detail(
        &self,
        _request_id: RequestId,
    ) -> Result<RequestDetail, StoreError> {
        Ok(self.frozen.clone())
    }

    async fn update_step(
        &self,
        step_id: String,
        patch: StepPatch,
        expected_version: u64,
    ) -> Result<Step, StoreError> {
        self.live.update_step(step_id, patch, expected_version).await
    }
}

#[tokio::test]
async fn test_lost_update_is_reported() {
    let store = sample_store();
    let engine = engine_over(store.clone());
    let owner = Actor::user(
        engine
            .start(REQUEST, DESIGN, &Actor::user("ana"))
            .await
            .unwrap()
            .step
            .user_id
            .unwrap(),
    );

    let frozen = store.get_request_detail(REQUEST.to_string()).await.unwrap();
    engine.hold(REQUEST, DESIGN, &owner).await.unwrap();

    let mut collaborators = Collaborators::from_backend(store.clone());
    collaborators.store = Arc::new(StaleReads {
        live: store.clone(),
        frozen,
    });
    let stale_engine = prodflow::StepEngine::new(collaborators);

    let err = stale_engine
        .hold(REQUEST, DESIGN, &owner)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StepError::ConcurrentModification {
            expected_version: 2,
            current_version: Some(3),
            ..
        }
    ));
    assert!(err.is_recoverable());
    assert_eq!(stale_engine.metrics().get_stats().concurrent_modifications, 1);
}
