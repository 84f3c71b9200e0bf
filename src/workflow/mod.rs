// Step lifecycle: hold cycles, guards, transitions and the engine that
// applies them against the external store.

pub mod clock;
pub mod engine;
pub mod errors;
pub mod holds;
pub mod state_machine;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{
    AssignmentOutcome, Collaborators, FieldView, PriceOutcome, RequestOverview, StepEngine,
    StepSummary, StepView, TransitionOutcome,
};
pub use errors::{ActionKind, GuardViolation, StepError};
pub use holds::{HoldAnomaly, HoldCycleTracker, HoldInfo, HoldSlot, NextAction, MAX_HOLDS};
pub use state_machine::{StepAction, StepStateMachine, TransitionInput, TransitionPlan};
pub use types::*;
