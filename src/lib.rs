// Prodflow Library - step lifecycle engine for product-development requests
// This exposes the core components for the CLI, tests and integration

pub mod assignment;
pub mod config;
pub mod cost;
pub mod external;
pub mod fields;
pub mod observability;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use assignment::{AssignmentError, AssignmentMode, StepAssignment};
pub use config::ProdflowConfig;
pub use cost::{CostError, CostLedger};
pub use external::{
    CatalogCache, HttpStoreClient, InMemoryStore, StoreError, WorkflowBackend, WorkspaceSnapshot,
};
pub use fields::{
    FieldCatalog, FieldDefinition, FieldTag, FieldValue, StepFieldValidator, ValidationResult,
};
pub use observability::{EngineMetrics, EngineStats, OperationTimer};
pub use telemetry::{create_step_span, generate_correlation_id, init_telemetry};
pub use workflow::{
    ActionKind, Actor, Collaborators, GuardViolation, HoldCycleTracker, HoldInfo, NextAction,
    RequestStatus, Step, StepAction, StepEngine, StepError, StepStateMachine, StepStatus,
};
