//! SLA sweep alerting against a manual clock.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

use tallerflow::catalog::stages::*;
use tallerflow::catalog::wait_causes::AUTORIZACION_CLIENTE;
use tallerflow::catalog::CatalogHandle;
use tallerflow::engine::{bootstrap_catalog, Clock, SlaStatus, TransitionOptions, WorkflowEngine};
use tallerflow::notify::{BroadcastNotifier, NotificationEvent};
use tallerflow::storage::SqliteStorage;
use tallerflow::sweep::sweep_once;

struct Harness {
    engine: WorkflowEngine,
    now: Arc<Mutex<DateTime<Utc>>>,
    events: broadcast::Receiver<NotificationEvent>,
}

impl Harness {
    async fn new() -> Self {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let catalog = bootstrap_catalog(&storage, None).await.unwrap();
        let now = Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2026, 9, 14, 8, 0, 0).unwrap(),
        ));
        let clock: Clock = {
            let now = Arc::clone(&now);
            Arc::new(move || *now.lock().unwrap())
        };
        let notifier = BroadcastNotifier::new();
        let events = notifier.subscribe();
        let engine = WorkflowEngine::new(storage, CatalogHandle::new(catalog))
            .with_clock(clock)
            .with_notifier(Arc::new(notifier));
        Self {
            engine,
            now,
            events,
        }
    }

    fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    /// Order sitting in DIAGNOSTICO (8h SLA, warning 6h, critical 7h).
    async fn order_in_diagnosis(&self, order_id: &str) {
        self.engine.open_order(order_id).await.unwrap();
        for stage in [INGRESO, DIAGNOSTICO] {
            self.engine
                .transition(order_id, stage, TransitionOptions::default())
                .await
                .unwrap();
        }
    }

    fn drain_alerts(&mut self) -> Vec<(String, SlaStatus, SlaStatus)> {
        let mut alerts = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let NotificationEvent::SlaThresholdCrossed {
                order_id,
                sla_status,
                previous_status,
                ..
            } = event
            {
                alerts.push((order_id, sla_status, previous_status));
            }
        }
        alerts
    }
}

#[tokio::test]
async fn test_each_threshold_alerts_once() {
    let mut h = Harness::new().await;
    h.order_in_diagnosis("OT-1").await;

    h.advance(Duration::hours(6));
    let report = sweep_once(&h.engine).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.alerts, 0);
    assert!(h.drain_alerts().is_empty());
    let order = h.engine.storage().get_order("OT-1").await.unwrap().unwrap();
    assert_eq!(order.last_sla_status, SlaStatus::Warning);

    h.advance(Duration::hours(1) + Duration::seconds(1));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 1);
    assert_eq!(
        h.drain_alerts(),
        vec![("OT-1".to_string(), SlaStatus::Critical, SlaStatus::Warning)]
    );

    h.advance(Duration::minutes(10));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 0);
    assert!(h.drain_alerts().is_empty());

    h.advance(Duration::hours(1));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 1);
    assert_eq!(
        h.drain_alerts(),
        vec![("OT-1".to_string(), SlaStatus::Breached, SlaStatus::Critical)]
    );

    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 0);
}

#[tokio::test]
async fn test_missed_ticks_raise_a_single_alert() {
    let mut h = Harness::new().await;
    h.order_in_diagnosis("OT-2").await;

    h.advance(Duration::hours(12));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 1);
    assert_eq!(
        h.drain_alerts(),
        vec![("OT-2".to_string(), SlaStatus::Breached, SlaStatus::OnTime)]
    );
}

#[tokio::test]
async fn test_transition_rearms_alerts_for_next_stage() {
    let mut h = Harness::new().await;
    h.order_in_diagnosis("OT-3").await;

    h.advance(Duration::hours(9));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 1);
    h.drain_alerts();

    h.engine
        .transition("OT-3", APROBACION_COTIZACION, TransitionOptions::default())
        .await
        .unwrap();
    let order = h.engine.storage().get_order("OT-3").await.unwrap().unwrap();
    assert_eq!(order.last_sla_status, SlaStatus::OnTime);

    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 0);

    // Quote approval: 24h SLA, critical at 21h
    h.advance(Duration::hours(22));
    assert_eq!(sweep_once(&h.engine).await.unwrap().alerts, 1);
    assert_eq!(
        h.drain_alerts(),
        vec![("OT-3".to_string(), SlaStatus::Critical, SlaStatus::OnTime)]
    );
}

#[tokio::test]
async fn test_paused_time_does_not_trigger_alerts() {
    let mut h = Harness::new().await;
    h.order_in_diagnosis("OT-4").await;

    h.advance(Duration::hours(2));
    h.engine.pause("OT-4", AUTORIZACION_CLIENTE).await.unwrap();
    h.advance(Duration::hours(30));

    let report = sweep_once(&h.engine).await.unwrap();
    assert_eq!(report.alerts, 0);
    assert!(h.drain_alerts().is_empty());
    assert_eq!(
        h.engine.status("OT-4").await.unwrap().sla_status,
        SlaStatus::OnTime
    );
}

#[tokio::test]
async fn test_closed_orders_are_not_swept() {
    let mut h = Harness::new().await;
    h.order_in_diagnosis("OT-5").await;
    for stage in [APROBACION_COTIZACION, ENTREGA] {
        h.engine
            .transition("OT-5", stage, TransitionOptions::default())
            .await
            .unwrap();
    }
    h.order_in_diagnosis("OT-6").await;

    h.advance(Duration::hours(100));
    let report = sweep_once(&h.engine).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.alerts, 1);
    let alerts = h.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, "OT-6");
}
