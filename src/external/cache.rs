//! Read-through cache for the slow-changing collaborators: the user
//! directory, field definitions and option catalogs. Failed loads are not
//! cached.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::store::{FieldDefinitionSource, OptionCatalogSource, StoreError, UserDirectory};
use crate::config::CacheConfig;
use crate::fields::FieldDefinition;
use crate::observability::EngineMetrics;
use crate::workflow::types::{CatalogEntry, DepartmentId, User};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Users(Option<DepartmentId>),
    FieldDefinitions,
    StatusCatalog,
    Materials,
    Categories,
}

#[derive(Debug, Clone)]
enum Cached {
    Users(Vec<User>),
    Fields(Vec<FieldDefinition>),
    Entries(Vec<CatalogEntry>),
}

pub struct CatalogCache<S> {
    inner: Arc<S>,
    cache: Cache<CacheKey, Cached>,
    metrics: Arc<EngineMetrics>,
}

impl<S> CatalogCache<S>
where
    S: UserDirectory + FieldDefinitionSource + OptionCatalogSource,
{
    pub fn new(inner: Arc<S>, settings: &CacheConfig, metrics: Arc<EngineMetrics>) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(Duration::from_secs(settings.ttl_seconds))
            .build();
        Self {
            inner,
            cache,
            metrics,
        }
    }

    /// Drop every cached listing, e.g. after the directory changed
    pub fn clear(&self) {
        self.cache.invalidate_all();
        info!("Catalog cache cleared");
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Cached> {
        match self.cache.get(key).await {
            Some(hit) => {
                self.metrics.record_cache_hit();
                debug!(?key, "Cache hit");
                Some(hit)
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    async fn entries<F, Fut>(&self, key: CacheKey, load: F) -> Result<Vec<CatalogEntry>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<CatalogEntry>, StoreError>>,
    {
        if let Some(Cached::Entries(entries)) = self.lookup(&key).await {
            return Ok(entries);
        }
        let entries = load().await?;
        self.cache.insert(key, Cached::Entries(entries.clone())).await;
        Ok(entries)
    }
}

#[async_trait]
impl<S> UserDirectory for CatalogCache<S>
where
    S: UserDirectory + FieldDefinitionSource + OptionCatalogSource,
{
    async fn list_users(
        &self,
        department_id: Option<DepartmentId>,
    ) -> Result<Vec<User>, StoreError> {
        let key = CacheKey::Users(department_id.clone());
        if let Some(Cached::Users(users)) = self.lookup(&key).await {
            return Ok(users);
        }
        let users = self.inner.list_users(department_id).await?;
        self.cache.insert(key, Cached::Users(users.clone())).await;
        Ok(users)
    }
}

#[async_trait]
impl<S> FieldDefinitionSource for CatalogCache<S>
where
    S: UserDirectory + FieldDefinitionSource + OptionCatalogSource,
{
    async fn list_field_definitions(&self) -> Result<Vec<FieldDefinition>, StoreError> {
        let key = CacheKey::FieldDefinitions;
        if let Some(Cached::Fields(fields)) = self.lookup(&key).await {
            return Ok(fields);
        }
        let fields = self.inner.list_field_definitions().await?;
        self.cache.insert(key, Cached::Fields(fields.clone())).await;
        Ok(fields)
    }
}

#[async_trait]
impl<S> OptionCatalogSource for CatalogCache<S>
where
    S: UserDirectory + FieldDefinitionSource + OptionCatalogSource,
{
    async fn list_status_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.entries(CacheKey::StatusCatalog, || self.inner.list_status_catalog())
            .await
    }

    async fn list_materials(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.entries(CacheKey::Materials, || self.inner.list_materials())
            .await
    }

    async fn list_categories(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.entries(CacheKey::Categories, || self.inner.list_categories())
            .await
    }
}
