//! Workflow engine.
//!
//! Owns every write to a work order's workflow data: opening the order,
//! stage transitions, and timer pause/resume. Each write runs under the
//! order's lock against one catalog snapshot and is committed as a single
//! storage transaction.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::OrderLocks;
use super::sla::{self, SlaEvaluation, SlaStatus};
use super::timer::TimerState;
use crate::catalog::{
    default_stages, default_wait_causes, parse_catalog_file, validate_catalog, CatalogDocument,
    CatalogHandle, StageCatalog,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::notify::{NotificationEvent, Notifier};
use crate::storage::{
    PauseRecord, SqliteStorage, StageHistoryRecord, TransitionCommit, WaitCauseRemoval,
    WorkOrderRecord,
};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Optional inputs to [`WorkflowEngine::transition`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionOptions {
    /// Stage the caller believes the order is in. A mismatch fails with
    /// `ConcurrentModification`.
    #[serde(default)]
    pub expected_stage: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Current stage, timer and SLA status of one work order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub stage: String,
    pub stage_name: String,
    pub timer: TimerState,
    pub sla_status: SlaStatus,
    pub sla: SlaEvaluation,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub catalog_version: u64,
}

/// Result of a successful transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from_stage: String,
    /// Active seconds frozen on the stage that was left.
    pub closed_active_seconds: u64,
    pub closed_sla_status: SlaStatus,
    pub status: OrderStatus,
}

/// One stage visit with its SLA status: frozen for closed visits, live for the open one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: StageHistoryRecord,
    pub stage_name: Option<String>,
    pub elapsed_seconds: u64,
    pub sla_status: SlaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseEntry {
    #[serde(flatten)]
    pub record: PauseRecord,
    pub wait_cause_name: Option<String>,
    pub paused_seconds: u64,
}

/// Snapshot of every open order, grouped for the shop-floor board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub catalog_version: u64,
    pub open_orders: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub by_sla_status: BTreeMap<String, usize>,
    pub orders: Vec<OrderStatus>,
}

/// Work-order workflow engine.
#[derive(Clone)]
pub struct WorkflowEngine {
    storage: SqliteStorage,
    catalog: CatalogHandle,
    locks: OrderLocks,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Clock,
}

impl WorkflowEngine {
    pub fn new(storage: SqliteStorage, catalog: CatalogHandle) -> Self {
        Self {
            storage,
            catalog,
            locks: OrderLocks::new(),
            notifier: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Attach a notifier for transition and SLA events.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create workflow data for a new order at the catalog's initial stage
    /// and start its timer.
    pub async fn open_order(&self, order_id: &str) -> Result<OrderStatus> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(Error::Validation("Work order id must not be empty".to_string()));
        }

        let _guard = self.locks.try_acquire(order_id)?;
        let catalog = self.catalog.snapshot();
        let stage = catalog.initial_stage()?;
        let now = self.now();

        let mut timer = TimerState::default();
        timer.start(now)?;

        let history = StageHistoryRecord {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            stage_id: stage.id.clone(),
            entered_at: now,
            exited_at: None,
            active_seconds: None,
            final_sla_status: None,
            note: None,
            actor: None,
        };
        let order = WorkOrderRecord {
            id: order_id.to_string(),
            current_stage: stage.id.clone(),
            current_history_id: Some(history.id.clone()),
            timer,
            last_sla_status: SlaStatus::OnTime,
            version: 1,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };

        self.storage.create_order(&order, &history).await?;
        metrics::inc_active_orders();
        info!(order_id = %order_id, stage = %stage.id, "Work order opened");

        self.order_status(&catalog, &order, now)
    }

    /// Move an order to `to_stage`.
    ///
    /// Closing the current visit, opening the next one and restarting the
    /// timer commit together or not at all.
    pub async fn transition(
        &self,
        order_id: &str,
        to_stage: &str,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome> {
        let _guard = match self.locks.try_acquire(order_id) {
            Ok(guard) => guard,
            Err(e) => {
                metrics::record_transition("unknown", to_stage, e.code());
                return Err(e);
            }
        };
        let catalog = self.catalog.snapshot();
        let order = self.load_order(order_id).await?;
        let from_stage = order.current_stage.clone();

        let result = self.apply_transition(&catalog, order, to_stage, options).await;
        metrics::record_transition(&from_stage, to_stage, metrics::outcome_label(&result));

        match &result {
            Ok(outcome) => {
                info!(
                    order_id = %order_id,
                    from = %outcome.from_stage,
                    to = %to_stage,
                    active_seconds = outcome.closed_active_seconds,
                    sla_status = %outcome.closed_sla_status,
                    "Work order transitioned"
                );
                if outcome.status.closed {
                    metrics::dec_active_orders();
                }
                self.emit(NotificationEvent::StageTransitioned {
                    order_id: order_id.to_string(),
                    from_stage: outcome.from_stage.clone(),
                    to_stage: to_stage.to_string(),
                    sla_status: outcome.closed_sla_status,
                })
                .await;
            }
            Err(e) => {
                warn!(order_id = %order_id, from = %from_stage, to = %to_stage, "Transition rejected: {}", e);
            }
        }

        result
    }

    async fn apply_transition(
        &self,
        catalog: &StageCatalog,
        order: WorkOrderRecord,
        to_stage: &str,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome> {
        if let Some(expected) = &options.expected_stage {
            if expected != &order.current_stage {
                return Err(Error::ConcurrentModification(order.id.clone()));
            }
        }

        if order.is_closed() || !catalog.is_transition_allowed(&order.current_stage, to_stage) {
            return Err(Error::IllegalTransition {
                from: order.current_stage.clone(),
                to: to_stage.to_string(),
            });
        }

        let from = catalog.get_stage(&order.current_stage)?;
        let to = catalog.get_stage(to_stage)?;
        let closed_history_id = order.current_history_id.clone().ok_or_else(|| {
            Error::Internal(format!("Open work order {} has no open stage visit", order.id))
        })?;

        let now = self.now();
        let mut timer = order.timer.clone();
        let closed_active_seconds = timer.finish(now)?;
        let closed_sla_status = sla::evaluate(from, closed_active_seconds);

        // A delivered order keeps no time on its clock.
        let terminal = to.is_terminal();
        if terminal {
            timer = TimerState::default();
        } else {
            timer.start(now)?;
        }

        let next_history = StageHistoryRecord {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            stage_id: to.id.clone(),
            entered_at: now,
            exited_at: terminal.then_some(now),
            active_seconds: terminal.then_some(0),
            final_sla_status: terminal.then_some(SlaStatus::OnTime),
            note: options.note,
            actor: options.actor,
        };

        let commit = TransitionCommit {
            order_id: order.id.clone(),
            expected_version: order.version,
            closed_history_id,
            exited_at: now,
            closed_active_seconds,
            closed_sla_status: Some(closed_sla_status),
            next_history,
            timer,
            closed_at: terminal.then_some(now),
        };
        let version = self.storage.commit_transition(&commit).await?;

        let updated = WorkOrderRecord {
            current_stage: to.id.clone(),
            current_history_id: (!terminal).then(|| commit.next_history.id.clone()),
            timer: commit.timer,
            last_sla_status: SlaStatus::OnTime,
            version,
            updated_at: now,
            closed_at: commit.closed_at,
            ..order
        };

        Ok(TransitionOutcome {
            from_stage: from.id.clone(),
            closed_active_seconds,
            closed_sla_status,
            status: self.order_status(catalog, &updated, now)?,
        })
    }

    /// Pause the order's timer for an active wait cause. The stage does not change.
    pub async fn pause(&self, order_id: &str, wait_cause_id: &str) -> Result<OrderStatus> {
        let result = self.pause_inner(order_id, wait_cause_id).await;
        metrics::record_timer_operation("pause", metrics::outcome_label(&result));
        match &result {
            Ok(_) => info!(order_id = %order_id, wait_cause = %wait_cause_id, "Timer paused"),
            Err(e) => debug!(order_id = %order_id, "Pause rejected: {}", e),
        }
        result
    }

    async fn pause_inner(&self, order_id: &str, wait_cause_id: &str) -> Result<OrderStatus> {
        let _guard = self.locks.try_acquire(order_id)?;
        let catalog = self.catalog.snapshot();
        let order = self.load_order(order_id).await?;

        let cause = catalog.active_wait_cause(wait_cause_id)?;
        let now = self.now();
        let mut timer = order.timer.clone();
        timer.pause(now, cause)?;

        let history_id = order.current_history_id.clone().ok_or_else(|| {
            Error::Internal(format!("Open work order {} has no open stage visit", order.id))
        })?;
        let pause = PauseRecord {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            history_id,
            stage_id: order.current_stage.clone(),
            wait_cause_id: cause.id.clone(),
            paused_at: now,
            resumed_at: None,
        };
        let version = self.storage.commit_pause(order.version, &timer, &pause).await?;

        let updated = WorkOrderRecord {
            timer,
            version,
            updated_at: now,
            ..order
        };
        self.order_status(&catalog, &updated, now)
    }

    /// Resume a paused timer.
    pub async fn resume(&self, order_id: &str) -> Result<OrderStatus> {
        let result = self.resume_inner(order_id).await;
        metrics::record_timer_operation("resume", metrics::outcome_label(&result));
        match &result {
            Ok(_) => info!(order_id = %order_id, "Timer resumed"),
            Err(e) => debug!(order_id = %order_id, "Resume rejected: {}", e),
        }
        result
    }

    async fn resume_inner(&self, order_id: &str) -> Result<OrderStatus> {
        let _guard = self.locks.try_acquire(order_id)?;
        let catalog = self.catalog.snapshot();
        let order = self.load_order(order_id).await?;

        let now = self.now();
        let mut timer = order.timer.clone();
        timer.resume(now)?;

        let version = self
            .storage
            .commit_resume(&order.id, order.version, &timer, now)
            .await?;

        let updated = WorkOrderRecord {
            timer,
            version,
            updated_at: now,
            ..order
        };
        self.order_status(&catalog, &updated, now)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current stage, timer and live SLA status.
    pub async fn status(&self, order_id: &str) -> Result<OrderStatus> {
        let catalog = self.catalog.snapshot();
        let order = self.load_order(order_id).await?;
        self.order_status(&catalog, &order, self.now())
    }

    /// Live SLA evaluation of the order's current stage.
    pub async fn evaluate_order(&self, order_id: &str) -> Result<SlaEvaluation> {
        Ok(self.status(order_id).await?.sla)
    }

    pub async fn history(&self, order_id: &str) -> Result<Vec<HistoryEntry>> {
        let catalog = self.catalog.snapshot();
        let order = self.load_order(order_id).await?;
        let now = self.now();

        let records = self.storage.get_history(order_id).await?;
        let entries = records
            .into_iter()
            .map(|record| {
                let stage = catalog.get_stage(&record.stage_id).ok();
                let (elapsed_seconds, sla_status) = match (record.active_seconds, record.final_sla_status) {
                    (Some(seconds), Some(status)) => (seconds, status),
                    _ => {
                        let seconds = if Some(&record.id) == order.current_history_id.as_ref() {
                            order.timer.current_active_seconds(now)
                        } else {
                            record.active_seconds.unwrap_or(0)
                        };
                        let status = stage
                            .map(|s| sla::evaluate(s, seconds))
                            .unwrap_or(SlaStatus::OnTime);
                        (seconds, status)
                    }
                };
                HistoryEntry {
                    stage_name: stage.map(|s| s.name.clone()),
                    elapsed_seconds,
                    sla_status,
                    record,
                }
            })
            .collect();

        Ok(entries)
    }

    pub async fn pauses(&self, order_id: &str) -> Result<Vec<PauseEntry>> {
        let catalog = self.catalog.snapshot();
        self.load_order(order_id).await?;
        let now = self.now();

        let records = self.storage.get_pauses(order_id).await?;
        Ok(records
            .into_iter()
            .map(|record| PauseEntry {
                wait_cause_name: catalog
                    .wait_cause(&record.wait_cause_id)
                    .map(|c| c.name.clone()),
                paused_seconds: record.paused_seconds(now),
                record,
            })
            .collect())
    }

    /// Status of every open order with counts per stage and per SLA status.
    pub async fn dashboard(&self) -> Result<Dashboard> {
        let catalog = self.catalog.snapshot();
        let now = self.now();
        let orders = self.storage.list_open_orders().await?;

        let mut by_stage: BTreeMap<String, usize> = catalog
            .list_stages()
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| (s.id.clone(), 0))
            .collect();
        let mut by_sla_status: BTreeMap<String, usize> = SlaStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();

        let mut statuses = Vec::with_capacity(orders.len());
        for order in &orders {
            match self.order_status(&catalog, order, now) {
                Ok(status) => {
                    *by_stage.entry(status.stage.clone()).or_default() += 1;
                    *by_sla_status.entry(status.sla_status.to_string()).or_default() += 1;
                    statuses.push(status);
                }
                Err(e) => warn!(order_id = %order.id, "Skipping order on dashboard: {}", e),
            }
        }

        Ok(Dashboard {
            generated_at: now,
            catalog_version: catalog.version(),
            open_orders: statuses.len(),
            by_stage,
            by_sla_status,
            orders: statuses,
        })
    }

    // ========================================================================
    // Catalog administration
    // ========================================================================

    /// Rebuild the catalog snapshot from storage and swap it in.
    pub async fn reload_catalog(&self) -> Result<Arc<StageCatalog>> {
        let stages = self.storage.list_stage_definitions().await?;
        if stages.is_empty() {
            return Err(Error::Config("No stage catalog stored".to_string()));
        }
        let causes = self.storage.list_wait_causes().await?;
        let catalog = self.catalog.replace(stages, causes)?;
        info!(version = catalog.version(), "Catalog reloaded");
        Ok(catalog)
    }

    /// Validate, persist and activate a new catalog.
    pub async fn import_catalog(&self, document: CatalogDocument) -> Result<Arc<StageCatalog>> {
        validate_catalog(&document.stages, &document.wait_causes)?;
        self.storage.replace_catalog(&document).await?;
        self.reload_catalog().await
    }

    /// Stop offering a wait cause for new pauses.
    pub async fn deactivate_wait_cause(&self, id: &str) -> Result<Arc<StageCatalog>> {
        if !self.storage.set_wait_cause_active(id, false).await? {
            return Err(Error::UnknownWaitCause(id.to_string()));
        }
        self.reload_catalog().await
    }

    /// Delete a wait cause, or deactivate it when recorded pauses reference it.
    pub async fn remove_wait_cause(&self, id: &str) -> Result<WaitCauseRemoval> {
        let outcome = self.storage.remove_wait_cause(id).await?;
        if outcome == WaitCauseRemoval::NotFound {
            return Err(Error::UnknownWaitCause(id.to_string()));
        }
        self.reload_catalog().await?;
        Ok(outcome)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_order(&self, order_id: &str) -> Result<WorkOrderRecord> {
        self.storage
            .get_order(order_id)
            .await?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    pub(crate) fn order_status(
        &self,
        catalog: &StageCatalog,
        order: &WorkOrderRecord,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus> {
        let stage = catalog.get_stage(&order.current_stage)?;
        let evaluation = sla::evaluate_detailed(stage, order.timer.current_active_seconds(now));
        Ok(OrderStatus {
            order_id: order.id.clone(),
            stage: stage.id.clone(),
            stage_name: stage.name.clone(),
            timer: order.timer.clone(),
            sla_status: evaluation.status,
            sla: evaluation,
            closed: order.is_closed(),
            closed_at: order.closed_at,
            version: order.version,
            catalog_version: catalog.version(),
        })
    }

    /// Publish an event. Failures are logged and counted, never returned.
    pub(crate) async fn emit(&self, event: NotificationEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let kind = match &event {
            NotificationEvent::StageTransitioned { .. } => "stage_transitioned",
            NotificationEvent::SlaThresholdCrossed { .. } => "sla_threshold_crossed",
        };
        let order_id = event.order_id().to_string();
        if let Err(e) = notifier.notify(event).await {
            metrics::record_notification_failure(kind);
            warn!(order_id = %order_id, "Failed to deliver {} notification: {}", kind, e);
        }
    }
}

/// Load the catalog the engine starts with.
///
/// A catalog file, when given, is validated and written to storage. Without
/// one the stored catalog is used, seeding the built-in defaults into an
/// empty database.
pub async fn bootstrap_catalog(
    storage: &SqliteStorage,
    catalog_path: Option<&Path>,
) -> Result<StageCatalog> {
    if let Some(path) = catalog_path {
        let document = parse_catalog_file(path)?;
        storage.replace_catalog(&document).await?;
        info!("Imported catalog from {}", path.display());
    } else if storage.list_stage_definitions().await?.is_empty() {
        let defaults = CatalogDocument {
            stages: default_stages(),
            wait_causes: default_wait_causes(),
        };
        storage.replace_catalog(&defaults).await?;
        info!("Seeded default stage catalog");
    }

    let stages = storage.list_stage_definitions().await?;
    let causes = storage.list_wait_causes().await?;
    StageCatalog::new(1, stages, causes)
}
