//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{SlaStatus, TimerState};

/// Workflow data of one work order.
///
/// The order itself (customer, vehicle, quote) lives elsewhere; this record
/// only references it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderRecord {
    pub id: String,
    pub current_stage: String,
    /// History row of the current stage visit. None once the order is closed.
    pub current_history_id: Option<String>,
    pub timer: TimerState,
    /// Last SLA status seen by the sweep for the current stage visit.
    pub last_sla_status: SlaStatus,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkOrderRecord {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// One visit of a work order to a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryRecord {
    pub id: String,
    pub order_id: String,
    pub stage_id: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    /// Written once when the visit closes.
    pub active_seconds: Option<u64>,
    pub final_sla_status: Option<SlaStatus>,
    pub note: Option<String>,
    pub actor: Option<String>,
}

impl StageHistoryRecord {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

/// One pause of a work-order timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRecord {
    pub id: String,
    pub order_id: String,
    pub history_id: String,
    pub stage_id: String,
    pub wait_cause_id: String,
    pub paused_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl PauseRecord {
    /// Paused seconds, counting an open pause up to `now`.
    pub fn paused_seconds(&self, now: DateTime<Utc>) -> u64 {
        let end = self.resumed_at.unwrap_or(now);
        (end - self.paused_at).num_seconds().max(0) as u64
    }
}

/// All writes of one stage transition, committed atomically.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub order_id: String,
    pub expected_version: i64,
    pub closed_history_id: String,
    pub exited_at: DateTime<Utc>,
    pub closed_active_seconds: u64,
    pub closed_sla_status: Option<SlaStatus>,
    pub next_history: StageHistoryRecord,
    pub timer: TimerState,
    /// Set when the target stage is terminal.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Outcome of removing a wait cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCauseRemoval {
    Deleted,
    /// Referenced by recorded pauses, so only deactivated.
    Deactivated,
    NotFound,
}

/// Database health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub foreign_keys_enabled: bool,
    pub integrity_check: String,
    pub journal_mode: String,
    pub busy_timeout_ms: i64,
    /// Open orders with no open stage visit.
    pub orders_without_open_stage: u64,
    /// Open pause rows whose order timer is not paused.
    pub dangling_pauses: u64,
}

impl DatabaseHealth {
    pub fn is_healthy(&self) -> bool {
        self.integrity_check == "ok"
            && self.orders_without_open_stage == 0
            && self.dangling_pauses == 0
    }
}
