//! Property-based tests for the bounded hold/continue cycle

use chrono::{DateTime, Duration, TimeZone, Utc};
use prodflow::workflow::{
    HoldCycleTracker, NextAction, StepAction, StepStateMachine, TransitionInput, MAX_HOLDS,
};
use prodflow::{Actor, Step, StepStatus};
use proptest::prelude::*;
use serde_json::json;

fn in_progress_step() -> Step {
    serde_json::from_value(json!({
        "id": "s1",
        "requestId": "req-1",
        "name": "Sampling",
        "order": 1,
        "departmentId": "rnd",
        "status": "IN_PROGRESS",
        "userId": "u1",
        "startEligible": true,
        "version": 1
    }))
    .unwrap()
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn arb_slot_date() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    proptest::option::of(
        (0i64..10_000).prop_map(|minutes| base_time() + Duration::minutes(minutes)),
    )
}

proptest! {
    /// Whatever sequence of hold/continue requests arrives, the accepted ones
    /// keep the stored history consistent and within budget.
    #[test]
    fn prop_state_machine_keeps_hold_history_consistent(
        requests in proptest::collection::vec(any::<bool>(), 0..20),
    ) {
        let actor = Actor::user("u1");
        let mut step = in_progress_step();
        let mut now = base_time();

        for wants_hold in requests {
            now += Duration::minutes(5);
            let action = if wants_hold { StepAction::Hold } else { StepAction::Continue };
            let input = TransitionInput::new(&actor, now);

            if let Ok(plan) = StepStateMachine::plan(&step, &action, &input) {
                plan.patch.apply_to(&mut step);
                step.version += 1;
            }

            let info = HoldCycleTracker::compute_hold_info(&step);
            prop_assert!(info.hold_count <= MAX_HOLDS);
            prop_assert!(info.continue_count <= info.hold_count);
            prop_assert!(info.hold_count - info.continue_count <= 1);
            prop_assert!(info.anomalies.is_empty());
            prop_assert_eq!(step.status == StepStatus::Hold, info.hold_count > info.continue_count);
        }
    }

    /// The tracker is total over any stored arrangement of dates
    #[test]
    fn prop_tracker_is_total(
        h1 in arb_slot_date(), c1 in arb_slot_date(),
        h2 in arb_slot_date(), c2 in arb_slot_date(),
        h3 in arb_slot_date(), c3 in arb_slot_date(),
    ) {
        let info = HoldCycleTracker::compute(&[(h1, c1), (h2, c2), (h3, c3)]);

        prop_assert!(info.hold_count <= MAX_HOLDS);
        prop_assert!(info.continue_count <= info.hold_count);
        match info.next_action {
            NextAction::Continue(slot) => {
                prop_assert!(info.hold_count > info.continue_count);
                prop_assert_eq!(slot.number(), info.continue_count + 1);
            }
            NextAction::Hold(slot) => {
                prop_assert_eq!(info.hold_count, info.continue_count);
                prop_assert_eq!(slot.number(), info.hold_count + 1);
            }
            NextAction::None => {
                prop_assert_eq!(info.hold_count, MAX_HOLDS);
                prop_assert_eq!(info.continue_count, MAX_HOLDS);
            }
        }
    }
}
