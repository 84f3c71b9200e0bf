//! REST binding of the collaborator traits
//!
//! Every call waits on a shared rate limiter before it is sent. Step writes
//! are conditional: the expected version travels in `If-Match` and a 409 or
//! 412 answer is a `VersionConflict`.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::store::{
    FieldDefinitionSource, HistorySink, OptionCatalogSource, RequestStore, StoreError,
    UserDirectory,
};
use crate::config::StoreConfig;
use crate::fields::FieldDefinition;
use crate::workflow::types::{
    CatalogEntry, DepartmentId, HistoryEntry, RequestDetail, RequestId, Step, StepPatch, User,
};

#[derive(Debug)]
pub struct HttpStoreClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl HttpStoreClient {
    pub fn new(settings: &StoreConfig) -> Result<Self, StoreError> {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(settings.burst_capacity).unwrap_or(per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(
            Quota::per_second(per_second).allow_burst(burst),
        ));

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| StoreError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            rate_limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().await.map_err(|e| StoreError::Network {
            message: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        entity: &str,
        id: &str,
    ) -> Result<T, StoreError> {
        debug!(path, "GET from request store");
        let response = self.send(self.client.get(self.url(path))).await?;
        Self::decode(response, entity, id).await
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        entity: &str,
        id: &str,
    ) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| StoreError::InvalidResponse {
                message: e.to_string(),
            });
        }
        Err(Self::failure(status, response, entity, id).await)
    }

    async fn failure(status: StatusCode, response: Response, entity: &str, id: &str) -> StoreError {
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => StoreError::not_found(entity, id),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                StoreError::VersionConflict {
                    current_version: current_version(&body),
                }
            }
            other => StoreError::Status {
                status: other.as_u16(),
                body,
            },
        }
    }
}

/// `{"currentVersion": n}` in a conflict body, when the store sends one
fn current_version(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("currentVersion")?
        .as_u64()
}

#[async_trait]
impl RequestStore for HttpStoreClient {
    async fn get_request_detail(&self, request_id: RequestId) -> Result<RequestDetail, StoreError> {
        self.get_json(&format!("requests/{request_id}"), "request", &request_id)
            .await
    }

    async fn update_step(
        &self,
        step_id: String,
        patch: StepPatch,
        expected_version: u64,
    ) -> Result<Step, StoreError> {
        debug!(step.id = %step_id, expected_version, "PATCH step");
        let request = self
            .client
            .patch(self.url(&format!("steps/{step_id}")))
            .header(header::IF_MATCH, expected_version.to_string())
            .json(&patch);
        let response = self.send(request).await?;
        Self::decode(response, "step", &step_id).await
    }
}

#[async_trait]
impl UserDirectory for HttpStoreClient {
    async fn list_users(
        &self,
        department_id: Option<DepartmentId>,
    ) -> Result<Vec<User>, StoreError> {
        let mut request = self.client.get(self.url("users"));
        if let Some(department_id) = &department_id {
            request = request.query(&[("departmentId", department_id)]);
        }
        let response = self.send(request).await?;
        Self::decode(response, "users", department_id.as_deref().unwrap_or("*")).await
    }
}

#[async_trait]
impl FieldDefinitionSource for HttpStoreClient {
    async fn list_field_definitions(&self) -> Result<Vec<FieldDefinition>, StoreError> {
        self.get_json("field-definitions", "field definitions", "*").await
    }
}

#[async_trait]
impl OptionCatalogSource for HttpStoreClient {
    async fn list_status_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.get_json("status-catalog", "status catalog", "*").await
    }

    async fn list_materials(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.get_json("materials", "materials", "*").await
    }

    async fn list_categories(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.get_json("categories", "categories", "*").await
    }
}

#[async_trait]
impl HistorySink for HttpStoreClient {
    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        let response = self
            .send(self.client.post(self.url("history")).json(&entry))
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::failure(status, response, "history", &entry.entity_id).await)
    }
}
