//! Shared fixtures for the integration tests

#![allow(dead_code)]

use prodflow::workflow::{Collaborators, FixedClock};
use prodflow::{InMemoryStore, StepAssignment, StepEngine, WorkspaceSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const SAMPLE_WORKSPACE: &str = include_str!("sample_workspace.json");

pub const REQUEST: &str = "req-100";
pub const DESIGN: &str = "step-design";
pub const COSTING: &str = "step-costing";
pub const APPROVAL: &str = "step-approval";

/// A request with three ordered steps: design (fields), costing (priced), approval (optional)
pub fn sample_snapshot() -> WorkspaceSnapshot {
    serde_json::from_str(SAMPLE_WORKSPACE).expect("sample workspace fixture must parse")
}

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-04T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn sample_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new(sample_snapshot()))
}

pub fn engine_over(store: Arc<InMemoryStore>) -> StepEngine {
    StepEngine::new(Collaborators::from_backend(store))
        .with_clock(Arc::new(FixedClock(fixed_now())))
        .with_assignment(StepAssignment::with_seed(11))
}
