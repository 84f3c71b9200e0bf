use anyhow::Result;
use prodflow::external::{CatalogCache, HttpStoreClient};
use prodflow::{Actor, Collaborators, EngineMetrics, ProdflowConfig, StepAssignment, StepEngine};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use super::workspace::with_workspace;

pub mod assign;
pub mod inspect;
pub mod lifecycle;
pub mod price;

/// Settings shared by every command invocation
pub struct CommandContext {
    pub config: ProdflowConfig,
    pub actor: Actor,
    pub workspace: PathBuf,
    pub remote: bool,
    pub metrics: Arc<EngineMetrics>,
}

impl CommandContext {
    /// Build an engine over the selected backend and hand it to `f`.
    /// Local workspaces are saved afterwards when `persist` is set.
    pub async fn with_engine<F, Fut, R>(&self, persist: bool, f: F) -> Result<R>
    where
        F: FnOnce(StepEngine) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if self.remote {
            let engine = self.engine(self.remote_collaborators()?);
            return f(engine).await;
        }

        with_workspace(&self.workspace, persist, |store| {
            f(self.engine(Collaborators::from_backend(store)))
        })
        .await
    }

    fn remote_collaborators(&self) -> Result<Collaborators> {
        let http = Arc::new(HttpStoreClient::new(&self.config.store)?);
        let cache = Arc::new(CatalogCache::new(
            http.clone(),
            &self.config.cache,
            self.metrics.clone(),
        ));
        Ok(Collaborators {
            store: http.clone(),
            users: cache.clone(),
            fields: cache.clone(),
            catalogs: cache,
            history: http,
        })
    }

    fn engine(&self, collaborators: Collaborators) -> StepEngine {
        let assignment = match self.config.workflow.assignment_seed {
            Some(seed) => StepAssignment::with_seed(seed),
            None => StepAssignment::new(),
        };
        StepEngine::new(collaborators)
            .with_assignment(assignment)
            .with_metrics(self.metrics.clone())
            .require_reason(self.config.workflow.require_cancel_reason)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
