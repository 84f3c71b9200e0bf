//! Step engine
//!
//! Orchestrates one step operation at a time: read the request detail, run
//! the guards, resolve collaborator data (assignees, field catalog, option
//! directories), plan the transition and issue a single conditional write.
//! History is appended after the write and never fails the operation.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use crate::assignment::{AssignmentMode, StepAssignment};
use crate::cost::CostLedger;
use crate::external::{
    FieldDefinitionSource, HistorySink, OptionCatalogSource, RequestStore, StoreError,
    UserDirectory, WorkflowBackend,
};
use crate::fields::{
    FieldCatalog, FieldDefinition, FieldTag, OptionContext, OptionSource, SelectOption,
    StepContext, StepFieldValidator, ValidationResult,
};
use crate::observability::{EngineMetrics, OperationTimer};
use crate::telemetry::{create_step_span, generate_correlation_id};
use crate::workflow::clock::{Clock, SystemClock};
use crate::workflow::errors::{ActionKind, GuardViolation, StepError};
use crate::workflow::holds::{HoldCycleTracker, HoldInfo};
use crate::workflow::state_machine::{StepAction, StepStateMachine, TransitionInput};
use crate::workflow::types::{
    Actor, HistoryAction, HistoryEntry, Request, RequestDetail, RequestStatus, Step, StepId,
    StepPatch, StepStatus, User, UserId,
};

/// The external services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RequestStore>,
    pub users: Arc<dyn UserDirectory>,
    pub fields: Arc<dyn FieldDefinitionSource>,
    pub catalogs: Arc<dyn OptionCatalogSource>,
    pub history: Arc<dyn HistorySink>,
}

impl Collaborators {
    /// Use one backend for every concern
    pub fn from_backend<B: WorkflowBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            store: backend.clone(),
            users: backend.clone(),
            fields: backend.clone(),
            catalogs: backend.clone(),
            history: backend,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub step: Step,
    pub from: StepStatus,
    pub to: StepStatus,
    pub history: HistoryEntry,
    /// Step that became eligible to start because this one finished
    pub activated_successor: Option<StepId>,
    pub request_status: RequestStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentOutcome {
    pub step: Step,
    pub assignee: User,
    pub history: HistoryEntry,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOutcome {
    pub step: Step,
    pub history: HistoryEntry,
}

/// A visible field with its resolved options and stored value
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub definition: FieldDefinition,
    pub options: Vec<SelectOption>,
    pub value: Option<Value>,
}

/// Everything a client needs to render one step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step: Step,
    pub hold_info: HoldInfo,
    pub legal_actions: Vec<ActionKind>,
    pub fields: Vec<FieldView>,
    pub request_status: RequestStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: StepId,
    pub name: String,
    pub order: u32,
    pub status: StepStatus,
    pub user_id: Option<UserId>,
    pub start_eligible: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOverview {
    pub request: Request,
    pub status: RequestStatus,
    pub steps: Vec<StepSummary>,
}

pub struct StepEngine {
    collaborators: Collaborators,
    assignment: StepAssignment,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    require_reason: bool,
}

impl StepEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            assignment: StepAssignment::new(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(EngineMetrics::new()),
            require_reason: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_assignment(mut self, assignment: StepAssignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether cancel and skip must carry a non-blank reason
    pub fn require_reason(mut self, required: bool) -> Self {
        self.require_reason = required;
        self
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// The request with its ordered steps and derived overall status
    pub async fn request_overview(&self, request_id: &str) -> Result<RequestOverview, StepError> {
        let detail = self.load_detail(request_id).await?;
        Ok(RequestOverview {
            status: detail.status(),
            steps: detail
                .ordered_steps()
                .into_iter()
                .map(|step| StepSummary {
                    id: step.id.clone(),
                    name: step.name.clone(),
                    order: step.order,
                    status: step.status,
                    user_id: step.user_id.clone(),
                    start_eligible: step.start_eligible,
                })
                .collect(),
            request: detail.request,
        })
    }

    pub async fn hold_info(&self, request_id: &str, step_id: &str) -> Result<HoldInfo, StepError> {
        let (_, step) = self.load_step(request_id, step_id).await?;
        Ok(HoldCycleTracker::compute_hold_info(&step))
    }

    pub async fn legal_actions(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
    ) -> Result<Vec<ActionKind>, StepError> {
        let (_, step) = self.load_step(request_id, step_id).await?;
        Ok(StepStateMachine::legal_actions(&step, actor))
    }

    /// Step snapshot with hold info, legal actions and its visible fields
    pub async fn describe(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
    ) -> Result<StepView, StepError> {
        let (detail, step) = self.load_step(request_id, step_id).await?;
        let catalog = self.field_catalog().await?;
        let visible: Vec<&FieldDefinition> = catalog.visible_for(&step).collect();
        let options = self.option_context(&visible).await?;

        let fields = visible
            .into_iter()
            .map(|definition| FieldView {
                options: if definition.kind.has_options() {
                    FieldCatalog::resolve_options(definition, &options)
                } else {
                    Vec::new()
                },
                value: step.field_subprocess.get(&definition.tag).cloned(),
                definition: definition.clone(),
            })
            .collect();

        Ok(StepView {
            hold_info: HoldCycleTracker::compute_hold_info(&step),
            legal_actions: StepStateMachine::legal_actions(&step, actor),
            fields,
            request_status: detail.status(),
            step,
        })
    }

    pub async fn start(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
    ) -> Result<TransitionOutcome, StepError> {
        self.transition(request_id, step_id, actor, StepAction::Start, BTreeMap::new())
            .await
    }

    pub async fn hold(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
    ) -> Result<TransitionOutcome, StepError> {
        self.transition(request_id, step_id, actor, StepAction::Hold, BTreeMap::new())
            .await
    }

    /// `continue`: leave the current hold cycle
    pub async fn resume(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
    ) -> Result<TransitionOutcome, StepError> {
        self.transition(request_id, step_id, actor, StepAction::Continue, BTreeMap::new())
            .await
    }

    /// Complete with newly submitted field values merged over the stored ones
    pub async fn complete(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        submitted: BTreeMap<FieldTag, Value>,
    ) -> Result<TransitionOutcome, StepError> {
        self.transition(request_id, step_id, actor, StepAction::Complete, submitted)
            .await
    }

    pub async fn cancel(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<TransitionOutcome, StepError> {
        let action = StepAction::Cancel {
            reason: reason.to_string(),
        };
        self.transition(request_id, step_id, actor, action, BTreeMap::new())
            .await
    }

    pub async fn skip(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<TransitionOutcome, StepError> {
        let action = StepAction::Skip {
            reason: reason.to_string(),
        };
        self.transition(request_id, step_id, actor, action, BTreeMap::new())
            .await
    }

    /// Apply one lifecycle action. Either the whole patch is written or
    /// nothing is.
    pub async fn transition(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        action: StepAction,
        submitted: BTreeMap<FieldTag, Value>,
    ) -> Result<TransitionOutcome, StepError> {
        let kind = action.kind();
        self.observed(
            kind,
            request_id,
            step_id,
            self.run_transition(request_id, step_id, actor, action, submitted),
        )
        .await
    }

    pub async fn assign(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        mode: AssignmentMode,
    ) -> Result<AssignmentOutcome, StepError> {
        self.observed(
            ActionKind::Assign,
            request_id,
            step_id,
            self.run_assign(request_id, step_id, actor, mode),
        )
        .await
    }

    /// Record the price of a cost-bearing step; `amount` is in the smallest
    /// currency unit
    pub async fn set_price(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        amount: i64,
    ) -> Result<PriceOutcome, StepError> {
        self.observed(
            ActionKind::SetPrice,
            request_id,
            step_id,
            self.run_set_price(request_id, step_id, actor, amount),
        )
        .await
    }

    async fn run_transition(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        action: StepAction,
        submitted: BTreeMap<FieldTag, Value>,
    ) -> Result<TransitionOutcome, StepError> {
        let (mut detail, step) = self.load_step(request_id, step_id).await?;
        let kind = action.kind();

        // Reject before touching any other collaborator.
        StepStateMachine::check(&step, kind, actor)?;

        let assignee = if kind == ActionKind::Start && step.user_id.is_none() {
            let directory = self.list_users().await?;
            Some(self.assignment.assign(&step, &directory)?.id)
        } else {
            None
        };

        let validation = if kind == ActionKind::Complete {
            Some(self.validate(&detail, &step, submitted).await?)
        } else {
            None
        };

        let now = self.clock.now();
        let input = TransitionInput {
            actor,
            now,
            assignee: assignee.as_ref(),
            validation: validation.as_ref(),
            require_reason: self.require_reason,
        };
        let plan = StepStateMachine::plan(&step, &action, &input)?;

        let updated = self
            .write_step(&plan.step_id, plan.patch.clone(), plan.expected_version)
            .await?;

        let changes = json!({
            "from": plan.from,
            "to": plan.to,
            "patch": plan.patch.changes(),
        });
        let history = HistoryEntry::for_step(&updated, actor, plan.history_action, changes, now);
        self.append_history(history.clone()).await;
        detail.replace_step(updated.clone());

        let activated_successor = if plan.activates_successor {
            self.activate_successor(&mut detail, &updated, actor).await
        } else {
            None
        };

        info!(
            step.id = %updated.id,
            from = %plan.from,
            to = %plan.to,
            version = updated.version,
            "Step transitioned"
        );

        Ok(TransitionOutcome {
            request_status: detail.status(),
            step: updated,
            from: plan.from,
            to: plan.to,
            history,
            activated_successor,
        })
    }

    async fn run_assign(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        mode: AssignmentMode,
    ) -> Result<AssignmentOutcome, StepError> {
        let (_, step) = self.load_step(request_id, step_id).await?;
        StepStateMachine::check(&step, ActionKind::Assign, actor)?;
        if matches!(mode, AssignmentMode::Manual { .. }) && !actor.is_admin {
            return Err(GuardViolation::AdminRequired {
                action: ActionKind::Assign,
            }
            .into());
        }

        let directory = self.list_users().await?;
        let assignee = self.assignment.resolve(&step, &mode, &directory)?;

        let patch = StepPatch {
            user_id: Some(assignee.id.clone()),
            ..Default::default()
        };
        let updated = self.write_step(&step.id, patch.clone(), step.version).await?;

        let changes = json!({ "mode": mode, "patch": patch.changes() });
        let now = self.clock.now();
        let history = HistoryEntry::for_step(&updated, actor, HistoryAction::Update, changes, now);
        self.append_history(history.clone()).await;

        Ok(AssignmentOutcome {
            step: updated,
            assignee,
            history,
        })
    }

    async fn run_set_price(
        &self,
        request_id: &str,
        step_id: &str,
        actor: &Actor,
        amount: i64,
    ) -> Result<PriceOutcome, StepError> {
        let (_, step) = self.load_step(request_id, step_id).await?;
        let patch = CostLedger::set_price(&step, &actor.user_id, amount)?;
        let updated = self.write_step(&step.id, patch.clone(), step.version).await?;

        let changes = json!({ "patch": patch.changes() });
        let now = self.clock.now();
        let history = HistoryEntry::for_step(&updated, actor, HistoryAction::Update, changes, now);
        self.append_history(history.clone()).await;

        Ok(PriceOutcome {
            step: updated,
            history,
        })
    }

    /// Run `operation` inside a correlated span and record its outcome
    async fn observed<T, F>(
        &self,
        kind: ActionKind,
        request_id: &str,
        step_id: &str,
        operation: F,
    ) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, StepError>>,
    {
        let span = create_step_span(kind.as_str(), request_id, step_id, &generate_correlation_id());
        let timer = OperationTimer::new(kind.as_str());
        let result = operation.instrument(span).await;

        match &result {
            Ok(_) => self.metrics.record_accepted(),
            Err(err @ StepError::ConcurrentModification { .. }) => {
                self.metrics.record_rejected();
                self.metrics.record_concurrent_modification();
                warn!(action = %kind, error = %err, "Step operation lost a concurrent update");
            }
            Err(err) if err.is_recoverable() => {
                self.metrics.record_rejected();
                warn!(
                    action = %kind,
                    category = err.category(),
                    error = %err,
                    "Step operation rejected"
                );
            }
            Err(err) => {
                self.metrics.record_store_error();
                error!(action = %kind, error = %err, "Step operation failed");
            }
        }

        timer.finish();
        result
    }

    async fn load_detail(&self, request_id: &str) -> Result<RequestDetail, StepError> {
        self.metrics.record_store_request();
        self.collaborators
            .store
            .get_request_detail(request_id.to_string())
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => StepError::RequestNotFound {
                    request_id: request_id.to_string(),
                },
                other => StepError::Store(other),
            })
    }

    async fn load_step(
        &self,
        request_id: &str,
        step_id: &str,
    ) -> Result<(RequestDetail, Step), StepError> {
        let detail = self.load_detail(request_id).await?;
        let step = detail
            .step(step_id)
            .cloned()
            .ok_or_else(|| StepError::StepNotFound {
                request_id: request_id.to_string(),
                step_id: step_id.to_string(),
            })?;
        Ok((detail, step))
    }

    async fn write_step(
        &self,
        step_id: &str,
        patch: StepPatch,
        expected_version: u64,
    ) -> Result<Step, StepError> {
        self.metrics.record_store_request();
        self.collaborators
            .store
            .update_step(step_id.to_string(), patch, expected_version)
            .await
            .map_err(|err| StepError::from_update(step_id, expected_version, err))
    }

    async fn append_history(&self, entry: HistoryEntry) {
        let entity_id = entry.entity_id.clone();
        if let Err(err) = self.collaborators.history.append_history(entry).await {
            self.metrics.record_history_failure();
            warn!(
                step.id = %entity_id,
                error = %err,
                "Failed to append history entry; step change is kept"
            );
        }
    }

    /// Mark the next ordered step as startable. A failure here is logged and
    /// leaves the finished step's transition in place.
    async fn activate_successor(
        &self,
        detail: &mut RequestDetail,
        finished: &Step,
        actor: &Actor,
    ) -> Option<StepId> {
        let next = detail.next_step_after(finished)?.clone();
        if next.start_eligible {
            return None;
        }

        let patch = StepPatch {
            start_eligible: Some(true),
            ..Default::default()
        };
        match self.write_step(&next.id, patch.clone(), next.version).await {
            Ok(updated) => {
                let changes = json!({ "after": finished.id, "patch": patch.changes() });
                let entry = HistoryEntry::for_step(
                    &updated,
                    actor,
                    HistoryAction::Update,
                    changes,
                    self.clock.now(),
                );
                self.append_history(entry).await;
                debug!(step.id = %updated.id, "Successor step is now eligible to start");
                let id = updated.id.clone();
                detail.replace_step(updated);
                Some(id)
            }
            Err(err) => {
                self.metrics.record_store_error();
                warn!(step.id = %next.id, error = %err, "Failed to activate successor step");
                None
            }
        }
    }

    async fn validate(
        &self,
        detail: &RequestDetail,
        step: &Step,
        submitted: BTreeMap<FieldTag, Value>,
    ) -> Result<ValidationResult, StepError> {
        let catalog = self.field_catalog().await?;
        let visible: Vec<&FieldDefinition> = catalog.visible_for(step).collect();
        let options = self.option_context(&visible).await?;

        let mut values = step.field_subprocess.clone();
        values.extend(submitted);

        let ctx = StepContext {
            step,
            options: &options,
            media: &detail.media,
        };
        let result = StepFieldValidator::validate(&catalog, &values, &ctx);
        if let ValidationResult::Invalid(failures) = &result {
            debug!(step.id = %step.id, failures = failures.len(), "Field validation failed");
        }
        Ok(result)
    }

    async fn field_catalog(&self) -> Result<FieldCatalog, StepError> {
        self.metrics.record_store_request();
        let definitions = self.collaborators.fields.list_field_definitions().await?;
        Ok(FieldCatalog::new(definitions))
    }

    async fn list_users(&self) -> Result<Vec<User>, StepError> {
        self.metrics.record_store_request();
        Ok(self.collaborators.users.list_users(None).await?)
    }

    /// Load only the directories the visible select fields refer to
    async fn option_context(
        &self,
        fields: &[&FieldDefinition],
    ) -> Result<OptionContext, StepError> {
        let sources: Vec<OptionSource> = fields
            .iter()
            .filter(|f| f.kind.has_options())
            .map(|f| FieldCatalog::option_source(f))
            .collect();

        let mut context = OptionContext::default();
        if sources.contains(&OptionSource::Users) {
            context.users = self.list_users().await?;
        }
        if sources.contains(&OptionSource::ProductStatus) {
            self.metrics.record_store_request();
            context.statuses = self.collaborators.catalogs.list_status_catalog().await?;
        }
        if sources.contains(&OptionSource::Materials) {
            self.metrics.record_store_request();
            context.materials = self.collaborators.catalogs.list_materials().await?;
        }
        if sources.contains(&OptionSource::Categories) {
            self.metrics.record_store_request();
            context.categories = self.collaborators.catalogs.list_categories().await?;
        }
        Ok(context)
    }
}
