//! SQLite storage implementation.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;

use super::models::*;
use crate::catalog::{CatalogDocument, StageDefinition, WaitCause};
use crate::engine::{SlaStatus, TimerState, TimerStatus};
use crate::error::{Error, Result};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime_utc).transpose()
}

/// Parse a stored enum column, surfacing unknown values as conversion failures.
fn parse_column<T: FromStr<Err = String>>(s: &str) -> rusqlite::Result<T> {
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })
}

fn seconds_from_sql(value: i64) -> u64 {
    value.max(0) as u64
}

const ORDER_COLUMNS: &str = "id, current_stage, current_history_id, timer_status, timer_started_at,
     timer_accumulated_seconds, timer_pause_reason, last_sla_status, version,
     created_at, updated_at, closed_at";

const HISTORY_COLUMNS: &str = "id, order_id, stage_id, entered_at, exited_at, active_seconds,
     final_sla_status, note, actor";

const PAUSE_COLUMNS: &str =
    "id, order_id, history_id, stage_id, wait_cause_id, paused_at, resumed_at";

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;

        // Initialize schema synchronously before wrapping in async mutex
        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;

        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> Result<()> {
        // WAL mode must be set before any transaction begins
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS stage_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL UNIQUE,
                sla_hours REAL NOT NULL DEFAULT 0,
                warning_threshold_hours REAL NOT NULL DEFAULT 0,
                critical_threshold_hours REAL NOT NULL DEFAULT 0,
                color TEXT NOT NULL,
                allowed_transitions TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS wait_causes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                color TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS work_orders (
                id TEXT PRIMARY KEY,
                current_stage TEXT NOT NULL,
                current_history_id TEXT,
                timer_status TEXT NOT NULL,
                timer_started_at TEXT,
                timer_accumulated_seconds INTEGER NOT NULL DEFAULT 0,
                timer_pause_reason TEXT,
                last_sla_status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS stage_history (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                stage_id TEXT NOT NULL,
                entered_at TEXT NOT NULL,
                exited_at TEXT,
                active_seconds INTEGER,
                final_sla_status TEXT,
                note TEXT,
                actor TEXT,
                FOREIGN KEY (order_id) REFERENCES work_orders(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS timer_pauses (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                history_id TEXT NOT NULL,
                stage_id TEXT NOT NULL,
                wait_cause_id TEXT NOT NULL,
                paused_at TEXT NOT NULL,
                resumed_at TEXT,
                FOREIGN KEY (order_id) REFERENCES work_orders(id) ON DELETE CASCADE,
                FOREIGN KEY (history_id) REFERENCES stage_history(id) ON DELETE CASCADE
            );

            -- At most one open stage visit per order.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_stage_history_open
                ON stage_history(order_id) WHERE exited_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_stage_history_order
                ON stage_history(order_id, entered_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_timer_pauses_open
                ON timer_pauses(order_id) WHERE resumed_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_timer_pauses_cause ON timer_pauses(wait_cause_id);
            CREATE INDEX IF NOT EXISTS idx_work_orders_open
                ON work_orders(closed_at) WHERE closed_at IS NULL;
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Catalog operations
    // ========================================================================

    /// Replace the stored stages and wait causes in one transaction.
    ///
    /// Fails with `Validation`, writing nothing, when a work order still sits
    /// in a stage the new catalog drops.
    pub async fn replace_catalog(&self, document: &CatalogDocument) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let in_use: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT DISTINCT current_stage FROM work_orders ORDER BY current_stage")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            ids
        };
        let dropped: Vec<&str> = in_use
            .iter()
            .map(String::as_str)
            .filter(|id| !document.stages.iter().any(|s| s.id == *id))
            .collect();
        if !dropped.is_empty() {
            return Err(Error::Validation(format!(
                "Catalog drops stages that still hold work orders: {}",
                dropped.join(", ")
            )));
        }

        Self::replace_stage_definitions_in(&tx, &document.stages)?;
        Self::replace_wait_causes_in(&tx, &document.wait_causes)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_stage_definitions_in(tx: &Transaction<'_>, stages: &[StageDefinition]) -> Result<()> {
        tx.execute("DELETE FROM stage_definitions", [])?;
        for stage in stages {
            tx.execute(
                "INSERT INTO stage_definitions
                 (id, name, sort_order, sla_hours, warning_threshold_hours, critical_threshold_hours,
                  color, allowed_transitions, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    stage.id,
                    stage.name,
                    stage.order,
                    stage.sla_hours,
                    stage.warning_threshold_hours,
                    stage.critical_threshold_hours,
                    stage.color,
                    serde_json::to_string(&stage.allowed_transitions)?,
                    stage.is_active,
                ],
            )?;
        }
        Ok(())
    }

    pub async fn list_stage_definitions(&self) -> Result<Vec<StageDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, sort_order, sla_hours, warning_threshold_hours,
                    critical_threshold_hours, color, allowed_transitions, is_active
             FROM stage_definitions ORDER BY sort_order",
        )?;

        let stages = stmt
            .query_map([], |row| {
                let transitions: String = row.get(7)?;
                Ok(StageDefinition {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    order: row.get(2)?,
                    sla_hours: row.get(3)?,
                    warning_threshold_hours: row.get(4)?,
                    critical_threshold_hours: row.get(5)?,
                    color: row.get(6)?,
                    allowed_transitions: serde_json::from_str(&transitions).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            7,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    is_active: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stages)
    }

    /// Upsert wait causes. Stored causes missing from `causes` are deleted,
    /// or only deactivated when a recorded pause references them.
    fn replace_wait_causes_in(tx: &Transaction<'_>, causes: &[WaitCause]) -> Result<()> {
        for cause in causes {
            tx.execute(
                "INSERT INTO wait_causes (id, name, description, color, sort_order, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    color = excluded.color,
                    sort_order = excluded.sort_order,
                    is_active = excluded.is_active",
                params![
                    cause.id,
                    cause.name,
                    cause.description,
                    cause.color,
                    cause.sort_order,
                    cause.is_active,
                ],
            )?;
        }

        let stored: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM wait_causes")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            ids
        };
        for id in stored {
            if !causes.iter().any(|c| c.id == id) {
                Self::remove_wait_cause_in(tx, &id)?;
            }
        }
        Ok(())
    }

    pub async fn list_wait_causes(&self) -> Result<Vec<WaitCause>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, color, sort_order, is_active
             FROM wait_causes ORDER BY sort_order, id",
        )?;

        let causes = stmt
            .query_map([], |row| {
                Ok(WaitCause {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    color: row.get(3)?,
                    sort_order: row.get(4)?,
                    is_active: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(causes)
    }

    /// Activate or deactivate a wait cause. Returns false if it does not exist.
    pub async fn set_wait_cause_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE wait_causes SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(changed > 0)
    }

    /// Remove a wait cause, deactivating it instead when pauses reference it.
    pub async fn remove_wait_cause(&self, id: &str) -> Result<WaitCauseRemoval> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let outcome = Self::remove_wait_cause_in(&tx, id)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn remove_wait_cause_in(tx: &Transaction<'_>, id: &str) -> Result<WaitCauseRemoval> {
        let referenced: i64 = tx.query_row(
            "SELECT COUNT(*) FROM timer_pauses WHERE wait_cause_id = ?1",
            [id],
            |row| row.get(0),
        )?;

        let (sql, outcome) = if referenced > 0 {
            (
                "UPDATE wait_causes SET is_active = 0 WHERE id = ?1",
                WaitCauseRemoval::Deactivated,
            )
        } else {
            (
                "DELETE FROM wait_causes WHERE id = ?1",
                WaitCauseRemoval::Deleted,
            )
        };

        if tx.execute(sql, [id])? == 0 {
            return Ok(WaitCauseRemoval::NotFound);
        }
        Ok(outcome)
    }

    // ========================================================================
    // Work order operations
    // ========================================================================

    /// Insert a new order together with its first stage visit.
    pub async fn create_order(
        &self,
        order: &WorkOrderRecord,
        first_stage: &StageHistoryRecord,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row("SELECT id FROM work_orders WHERE id = ?1", [&order.id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(Error::OrderExists(order.id.clone()));
        }

        tx.execute(
            "INSERT INTO work_orders
             (id, current_stage, current_history_id, timer_status, timer_started_at,
              timer_accumulated_seconds, timer_pause_reason, last_sla_status, version,
              created_at, updated_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                order.id,
                order.current_stage,
                order.current_history_id,
                order.timer.status.to_string(),
                order.timer.started_at.map(|t| t.to_rfc3339()),
                order.timer.accumulated_seconds as i64,
                order.timer.pause_reason,
                order.last_sla_status.to_string(),
                order.version,
                order.created_at.to_rfc3339(),
                order.updated_at.to_rfc3339(),
                order.closed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Self::insert_history(&tx, first_stage)?;

        tx.commit()?;
        Ok(())
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<WorkOrderRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM work_orders WHERE id = ?1", ORDER_COLUMNS);
        let order = conn
            .query_row(&sql, [id], Self::row_to_order)
            .optional()?;
        Ok(order)
    }

    /// Orders that have not reached a terminal stage, oldest first.
    pub async fn list_open_orders(&self) -> Result<Vec<WorkOrderRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM work_orders WHERE closed_at IS NULL ORDER BY created_at, id",
            ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map([], Self::row_to_order)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    pub async fn count_open_orders(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM work_orders WHERE closed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Close the current stage visit, open the next one and store the new
    /// timer in one transaction. Returns the order's new version.
    ///
    /// Fails with `ConcurrentModification` if the order changed since
    /// `expected_version` was read; nothing is written in that case.
    pub async fn commit_transition(&self, commit: &TransitionCommit) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = commit.exited_at;

        let current_history_id = if commit.closed_at.is_some() {
            None
        } else {
            Some(commit.next_history.id.as_str())
        };

        let changed = tx.execute(
            "UPDATE work_orders SET
                current_stage = ?1,
                current_history_id = ?2,
                timer_status = ?3,
                timer_started_at = ?4,
                timer_accumulated_seconds = ?5,
                timer_pause_reason = ?6,
                last_sla_status = ?7,
                updated_at = ?8,
                closed_at = ?9,
                version = version + 1
             WHERE id = ?10 AND version = ?11",
            params![
                commit.next_history.stage_id,
                current_history_id,
                commit.timer.status.to_string(),
                commit.timer.started_at.map(|t| t.to_rfc3339()),
                commit.timer.accumulated_seconds as i64,
                commit.timer.pause_reason,
                SlaStatus::OnTime.to_string(),
                now.to_rfc3339(),
                commit.closed_at.map(|t| t.to_rfc3339()),
                commit.order_id,
                commit.expected_version,
            ],
        )?;
        if changed == 0 {
            return Err(Self::missing_or_stale(&tx, &commit.order_id)?);
        }

        let closed = tx.execute(
            "UPDATE stage_history SET exited_at = ?1, active_seconds = ?2, final_sla_status = ?3
             WHERE id = ?4 AND order_id = ?5 AND exited_at IS NULL",
            params![
                now.to_rfc3339(),
                commit.closed_active_seconds as i64,
                commit.closed_sla_status.map(|s| s.to_string()),
                commit.closed_history_id,
                commit.order_id,
            ],
        )?;
        if closed != 1 {
            return Err(Error::Storage(format!(
                "Open stage visit {} not found for order {}",
                commit.closed_history_id, commit.order_id
            )));
        }

        tx.execute(
            "UPDATE timer_pauses SET resumed_at = ?1 WHERE order_id = ?2 AND resumed_at IS NULL",
            params![now.to_rfc3339(), commit.order_id],
        )?;

        Self::insert_history(&tx, &commit.next_history)?;

        let new_version: i64 = tx.query_row(
            "SELECT version FROM work_orders WHERE id = ?1",
            [&commit.order_id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(new_version)
    }

    /// Store a paused timer and open a pause record. Returns the new version.
    pub async fn commit_pause(
        &self,
        expected_version: i64,
        timer: &TimerState,
        pause: &PauseRecord,
    ) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let version = Self::update_timer(&tx, &pause.order_id, expected_version, timer, pause.paused_at)?;

        tx.execute(
            "INSERT INTO timer_pauses
             (id, order_id, history_id, stage_id, wait_cause_id, paused_at, resumed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pause.id,
                pause.order_id,
                pause.history_id,
                pause.stage_id,
                pause.wait_cause_id,
                pause.paused_at.to_rfc3339(),
                pause.resumed_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        tx.commit()?;
        Ok(version)
    }

    /// Store a resumed timer and close the open pause record. Returns the new version.
    pub async fn commit_resume(
        &self,
        order_id: &str,
        expected_version: i64,
        timer: &TimerState,
        resumed_at: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let version = Self::update_timer(&tx, order_id, expected_version, timer, resumed_at)?;

        tx.execute(
            "UPDATE timer_pauses SET resumed_at = ?1 WHERE order_id = ?2 AND resumed_at IS NULL",
            params![resumed_at.to_rfc3339(), order_id],
        )?;

        tx.commit()?;
        Ok(version)
    }

    /// Remember the SLA status the sweep last saw for the order's current visit.
    ///
    /// Does not bump the version. Returns false when the order moved on since
    /// `version` was read.
    pub async fn record_sla_status(
        &self,
        order_id: &str,
        version: i64,
        status: SlaStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE work_orders SET last_sla_status = ?1 WHERE id = ?2 AND version = ?3",
            params![status.to_string(), order_id, version],
        )?;
        Ok(changed > 0)
    }

    pub async fn get_history(&self, order_id: &str) -> Result<Vec<StageHistoryRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM stage_history WHERE order_id = ?1 ORDER BY entered_at, rowid",
            HISTORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let history = stmt
            .query_map([order_id], Self::row_to_history)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(history)
    }

    pub async fn get_pauses(&self, order_id: &str) -> Result<Vec<PauseRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM timer_pauses WHERE order_id = ?1 ORDER BY paused_at, rowid",
            PAUSE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let pauses = stmt
            .query_map([order_id], Self::row_to_pause)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pauses)
    }

    pub async fn check_health(&self) -> Result<DatabaseHealth> {
        let conn = self.conn.lock().await;

        let foreign_keys_enabled: i64 =
            conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        let integrity_check: String =
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;

        let orders_without_open_stage: i64 = conn.query_row(
            "SELECT COUNT(*) FROM work_orders o
             WHERE o.closed_at IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM stage_history h
                   WHERE h.order_id = o.id AND h.exited_at IS NULL
               )",
            [],
            |row| row.get(0),
        )?;

        let dangling_pauses: i64 = conn.query_row(
            "SELECT COUNT(*) FROM timer_pauses p
             JOIN work_orders o ON o.id = p.order_id
             WHERE p.resumed_at IS NULL AND o.timer_status != 'paused'",
            [],
            |row| row.get(0),
        )?;

        Ok(DatabaseHealth {
            foreign_keys_enabled: foreign_keys_enabled == 1,
            integrity_check,
            journal_mode,
            busy_timeout_ms,
            orders_without_open_stage: orders_without_open_stage.max(0) as u64,
            dangling_pauses: dangling_pauses.max(0) as u64,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn update_timer(
        tx: &Transaction<'_>,
        order_id: &str,
        expected_version: i64,
        timer: &TimerState,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let changed = tx.execute(
            "UPDATE work_orders SET
                timer_status = ?1,
                timer_started_at = ?2,
                timer_accumulated_seconds = ?3,
                timer_pause_reason = ?4,
                updated_at = ?5,
                version = version + 1
             WHERE id = ?6 AND version = ?7",
            params![
                timer.status.to_string(),
                timer.started_at.map(|t| t.to_rfc3339()),
                timer.accumulated_seconds as i64,
                timer.pause_reason,
                now.to_rfc3339(),
                order_id,
                expected_version,
            ],
        )?;
        if changed == 0 {
            return Err(Self::missing_or_stale(tx, order_id)?);
        }
        Ok(expected_version + 1)
    }

    /// Explain why a versioned update touched no row.
    fn missing_or_stale(tx: &Transaction<'_>, order_id: &str) -> Result<Error> {
        let exists: Option<i64> = tx
            .query_row("SELECT version FROM work_orders WHERE id = ?1", [order_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(match exists {
            Some(_) => Error::ConcurrentModification(order_id.to_string()),
            None => Error::OrderNotFound(order_id.to_string()),
        })
    }

    fn insert_history(tx: &Transaction<'_>, record: &StageHistoryRecord) -> Result<()> {
        tx.execute(
            "INSERT INTO stage_history
             (id, order_id, stage_id, entered_at, exited_at, active_seconds, final_sla_status, note, actor)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.order_id,
                record.stage_id,
                record.entered_at.to_rfc3339(),
                record.exited_at.map(|t| t.to_rfc3339()),
                record.active_seconds.map(|s| s as i64),
                record.final_sla_status.map(|s| s.to_string()),
                record.note,
                record.actor,
            ],
        )?;
        Ok(())
    }

    fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkOrderRecord> {
        let timer_status: String = row.get(3)?;
        let last_sla: String = row.get(7)?;
        Ok(WorkOrderRecord {
            id: row.get(0)?,
            current_stage: row.get(1)?,
            current_history_id: row.get(2)?,
            timer: TimerState {
                status: parse_column::<TimerStatus>(&timer_status)?,
                started_at: parse_optional_datetime(row.get(4)?)?,
                accumulated_seconds: seconds_from_sql(row.get(5)?),
                pause_reason: row.get(6)?,
            },
            last_sla_status: parse_column::<SlaStatus>(&last_sla)?,
            version: row.get(8)?,
            created_at: parse_datetime_utc(&row.get::<_, String>(9)?)?,
            updated_at: parse_datetime_utc(&row.get::<_, String>(10)?)?,
            closed_at: parse_optional_datetime(row.get(11)?)?,
        })
    }

    fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<StageHistoryRecord> {
        let final_sla: Option<String> = row.get(6)?;
        Ok(StageHistoryRecord {
            id: row.get(0)?,
            order_id: row.get(1)?,
            stage_id: row.get(2)?,
            entered_at: parse_datetime_utc(&row.get::<_, String>(3)?)?,
            exited_at: parse_optional_datetime(row.get(4)?)?,
            active_seconds: row.get::<_, Option<i64>>(5)?.map(seconds_from_sql),
            final_sla_status: final_sla
                .as_deref()
                .map(parse_column::<SlaStatus>)
                .transpose()?,
            note: row.get(7)?,
            actor: row.get(8)?,
        })
    }

    fn row_to_pause(row: &rusqlite::Row<'_>) -> rusqlite::Result<PauseRecord> {
        Ok(PauseRecord {
            id: row.get(0)?,
            order_id: row.get(1)?,
            history_id: row.get(2)?,
            stage_id: row.get(3)?,
            wait_cause_id: row.get(4)?,
            paused_at: parse_datetime_utc(&row.get::<_, String>(5)?)?,
            resumed_at: parse_optional_datetime(row.get(6)?)?,
        })
    }
}
