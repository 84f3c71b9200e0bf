//! In-process backend over a serializable workspace snapshot
//!
//! Backs the CLI (snapshot loaded from and saved to a JSON file) and the
//! engine integration tests. Conditional writes follow the same contract as
//! the HTTP store: a stale `expected_version` is a `VersionConflict`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{
    FieldDefinitionSource, HistorySink, OptionCatalogSource, RequestStore, StoreError,
    UserDirectory,
};
use crate::fields::FieldDefinition;
use crate::workflow::types::{
    CatalogEntry, DepartmentId, HistoryEntry, MediaAsset, Request, RequestDetail, RequestId,
    Step, StepPatch, User,
};

/// Everything the backend holds, in its on-disk shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub field_definitions: Vec<FieldDefinition>,
    #[serde(default)]
    pub status_catalog: Vec<CatalogEntry>,
    #[serde(default)]
    pub materials: Vec<CatalogEntry>,
    #[serde(default)]
    pub categories: Vec<CatalogEntry>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl WorkspaceSnapshot {
    /// Assemble the request with its steps, step media and linked materials
    pub fn request_detail(&self, request_id: &str) -> Option<RequestDetail> {
        let request = self.requests.iter().find(|r| r.id == request_id)?.clone();

        let mut steps: Vec<Step> = self
            .steps
            .iter()
            .filter(|s| s.request_id == request_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.order);

        let step_ids: BTreeSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let media = self
            .media
            .iter()
            .filter(|m| {
                m.step_id
                    .as_deref()
                    .is_some_and(|id| step_ids.contains(id))
            })
            .cloned()
            .collect();

        let materials = self
            .materials
            .iter()
            .filter(|m| request.material_ids.contains(&m.id))
            .cloned()
            .collect();

        Some(RequestDetail {
            request,
            steps,
            media,
            materials,
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<WorkspaceSnapshot>,
}

impl InMemoryStore {
    pub fn new(snapshot: WorkspaceSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Copy of the current state, e.g. for persisting
    pub async fn snapshot(&self) -> WorkspaceSnapshot {
        self.state.read().await.clone()
    }

    pub fn into_snapshot(self) -> WorkspaceSnapshot {
        self.state.into_inner()
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn get_request_detail(&self, request_id: RequestId) -> Result<RequestDetail, StoreError> {
        self.state
            .read()
            .await
            .request_detail(&request_id)
            .ok_or_else(|| StoreError::not_found("request", &request_id))
    }

    async fn update_step(
        &self,
        step_id: String,
        patch: StepPatch,
        expected_version: u64,
    ) -> Result<Step, StoreError> {
        let mut state = self.state.write().await;
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StoreError::not_found("step", &step_id))?;

        if step.version != expected_version {
            return Err(StoreError::VersionConflict {
                current_version: Some(step.version),
            });
        }

        patch.apply_to(step);
        step.version += 1;
        debug!(step.id = %step.id, version = step.version, "Step written");
        Ok(step.clone())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn list_users(
        &self,
        department_id: Option<DepartmentId>,
    ) -> Result<Vec<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .filter(|u| department_id.as_ref().map_or(true, |d| &u.department_id == d))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FieldDefinitionSource for InMemoryStore {
    async fn list_field_definitions(&self) -> Result<Vec<FieldDefinition>, StoreError> {
        Ok(self.state.read().await.field_definitions.clone())
    }
}

#[async_trait]
impl OptionCatalogSource for InMemoryStore {
    async fn list_status_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.state.read().await.status_catalog.clone())
    }

    async fn list_materials(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.state.read().await.materials.clone())
    }

    async fn list_categories(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.state.read().await.categories.clone())
    }
}

#[async_trait]
impl HistorySink for InMemoryStore {
    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.state.write().await.history.push(entry);
        Ok(())
    }
}
