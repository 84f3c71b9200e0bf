//! Collaborator seams consumed by the step engine
//!
//! The engine never implements persistence, the user directory or the
//! catalogs itself. Each concern is a trait so the composition root can plug
//! in the HTTP binding, the in-memory store or test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::fields::FieldDefinition;
use crate::workflow::types::{
    CatalogEntry, DepartmentId, HistoryEntry, RequestDetail, RequestId, Step, StepPatch, User,
};

/// Failures of the external store call itself
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },
    /// Conditional update lost: the stored revision moved on
    #[error("version conflict (current version {current_version:?})")]
    VersionConflict { current_version: Option<u64> },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("store responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response from store: {message}")]
    InvalidResponse { message: String },
}

impl StoreError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        StoreError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

/// `GetRequestDetail` / `UpdateStep`
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn get_request_detail(&self, request_id: RequestId) -> Result<RequestDetail, StoreError>;

    /// Conditional write: must fail with `VersionConflict` unless the stored
    /// step is still at `expected_version`. Returns the step as stored.
    async fn update_step(
        &self,
        step_id: String,
        patch: StepPatch,
        expected_version: u64,
    ) -> Result<Step, StoreError>;
}

/// `ListUsers`
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self, department_id: Option<DepartmentId>)
        -> Result<Vec<User>, StoreError>;
}

/// `ListFieldDefinitions`
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait FieldDefinitionSource: Send + Sync {
    async fn list_field_definitions(&self) -> Result<Vec<FieldDefinition>, StoreError>;
}

/// `ListStatusCatalog` / `ListMaterials` / `ListCategories`
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait OptionCatalogSource: Send + Sync {
    async fn list_status_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError>;
    async fn list_materials(&self) -> Result<Vec<CatalogEntry>, StoreError>;
    async fn list_categories(&self) -> Result<Vec<CatalogEntry>, StoreError>;
}

/// `AppendHistory`, fire-and-forget from the engine's point of view
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError>;
}

/// Everything a backend has to provide to drive the engine end to end
pub trait WorkflowBackend:
    RequestStore + UserDirectory + FieldDefinitionSource + OptionCatalogSource + HistorySink
{
}

impl<T> WorkflowBackend for T where
    T: RequestStore + UserDirectory + FieldDefinitionSource + OptionCatalogSource + HistorySink
{
}
