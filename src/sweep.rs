//! Periodic SLA sweep.
//!
//! Re-evaluates every open order on a fixed interval and raises an alert the
//! first time an order's current stage visit reaches CRITICAL or BREACHED.
//! The last status seen is stored per order, so restarting the sweep (or
//! missing ticks) never repeats an alert for the same crossing.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::{sla, SlaStatus, WorkflowEngine};
use crate::error::{Error, Result};
use crate::metrics;
use crate::notify::NotificationEvent;
use crate::storage::WorkOrderRecord;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub alerts: usize,
    pub failures: usize,
}

/// Background task running [`SlaSweeper::sweep_once`] on an interval.
pub struct SlaSweeper {
    engine: WorkflowEngine,
    interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SlaSweeper {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background sweep task.
    pub fn start(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("Sweep interval must be positive".to_string()));
        }
        if self.handle.is_some() {
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = self.engine.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("SLA sweep received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sweep_once(&engine).await {
                            error!("SLA sweep failed: {}", e);
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!("SLA sweep started with {}s interval", self.interval.as_secs());
        Ok(())
    }

    /// Stop the background task and wait for it to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        info!("SLA sweep stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Run one sweep immediately.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        sweep_once(&self.engine).await
    }
}

/// Evaluate every open order once.
///
/// A failure on one order is logged and counted; the rest of the sweep
/// carries on.
pub async fn sweep_once(engine: &WorkflowEngine) -> Result<SweepReport> {
    let started = Instant::now();
    let orders = engine.storage().list_open_orders().await?;
    let mut report = SweepReport {
        scanned: orders.len(),
        ..Default::default()
    };

    for order in &orders {
        match sweep_order(engine, order).await {
            Ok(true) => report.alerts += 1,
            Ok(false) => {}
            Err(e) => {
                report.failures += 1;
                metrics::record_sweep_failure();
                warn!(order_id = %order.id, "Skipping order in SLA sweep: {}", e);
            }
        }
    }

    metrics::set_active_orders(orders.len() as u64);
    metrics::record_sweep_duration(started.elapsed());
    debug!(
        scanned = report.scanned,
        alerts = report.alerts,
        failures = report.failures,
        "SLA sweep finished"
    );
    Ok(report)
}

/// Returns true when an alert was raised for this order.
async fn sweep_order(engine: &WorkflowEngine, order: &WorkOrderRecord) -> Result<bool> {
    let catalog = engine.catalog().snapshot();
    let stage = catalog.get_stage(&order.current_stage)?;
    let now = engine.now();
    let live = sla::evaluate(stage, order.timer.current_active_seconds(now));
    let previous = order.last_sla_status;

    if live == previous {
        return Ok(false);
    }

    // A transition since the read bumps the version; the stale status is dropped.
    let recorded = engine
        .storage()
        .record_sla_status(&order.id, order.version, live)
        .await?;
    if !recorded {
        debug!(order_id = %order.id, "Order changed during sweep, skipping");
        return Ok(false);
    }

    if !is_alert_edge(previous, live) {
        return Ok(false);
    }

    warn!(
        order_id = %order.id,
        stage = %stage.id,
        sla_status = %live,
        previous = %previous,
        "SLA threshold crossed"
    );
    metrics::record_sla_alert(live);
    engine
        .emit(NotificationEvent::SlaThresholdCrossed {
            order_id: order.id.clone(),
            stage: stage.id.clone(),
            sla_status: live,
            previous_status: previous,
        })
        .await;
    Ok(true)
}

/// Whether an alert is due when the status moves from `previous` to `live`.
pub fn is_alert_edge(previous: SlaStatus, live: SlaStatus) -> bool {
    live.is_alerting() && live > previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogHandle;
    use crate::engine::bootstrap_catalog;
    use crate::storage::SqliteStorage;

    async fn engine() -> WorkflowEngine {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let catalog = bootstrap_catalog(&storage, None).await.unwrap();
        WorkflowEngine::new(storage, CatalogHandle::new(catalog))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut sweeper = SlaSweeper::new(engine().await).with_interval(Duration::from_millis(10));
        sweeper.start().unwrap();
        assert!(sweeper.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;
        sweeper.stop().await.unwrap();
        assert!(!sweeper.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let mut sweeper = SlaSweeper::new(engine().await).with_interval(Duration::ZERO);
        assert!(matches!(sweeper.start(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_fresh_orders_raise_nothing() {
        let engine = engine().await;
        engine.open_order("OT-1").await.unwrap();
        let report = SlaSweeper::new(engine).sweep_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                alerts: 0,
                failures: 0
            }
        );
    }

    #[test]
    fn test_alert_edges() {
        assert!(is_alert_edge(SlaStatus::Warning, SlaStatus::Critical));
        assert!(is_alert_edge(SlaStatus::Critical, SlaStatus::Breached));
        assert!(is_alert_edge(SlaStatus::Warning, SlaStatus::Breached));
        assert!(is_alert_edge(SlaStatus::OnTime, SlaStatus::Critical));
        assert!(!is_alert_edge(SlaStatus::OnTime, SlaStatus::Warning));
        assert!(!is_alert_edge(SlaStatus::Critical, SlaStatus::Critical));
        assert!(!is_alert_edge(SlaStatus::Breached, SlaStatus::Critical));
    }
}
