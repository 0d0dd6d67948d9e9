//! Notification events emitted by the workflow engine.
//!
//! The engine only publishes events; delivery and formatting belong to
//! whatever [`Notifier`] is plugged in. Events are emitted after the
//! corresponding write has committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::engine::SlaStatus;
use crate::error::Result;

/// Broadcast channel capacity for the in-process notifier.
const BROADCAST_CAPACITY: usize = 1024;

/// Event published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A work order moved to another stage.
    StageTransitioned {
        order_id: String,
        from_stage: String,
        to_stage: String,
        /// Final SLA status of the stage that was left.
        sla_status: SlaStatus,
    },
    /// The sweep saw an order cross into CRITICAL or BREACHED.
    SlaThresholdCrossed {
        order_id: String,
        stage: String,
        sla_status: SlaStatus,
        previous_status: SlaStatus,
    },
}

impl NotificationEvent {
    pub fn order_id(&self) -> &str {
        match self {
            Self::StageTransitioned { order_id, .. } => order_id,
            Self::SlaThresholdCrossed { order_id, .. } => order_id,
        }
    }
}

/// Sink for engine events.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, event: NotificationEvent) -> Result<()>;
}

/// In-process notifier using `tokio::sync::broadcast`.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<()> {
        // No subscribers is not an error
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<()> {
        match &event {
            NotificationEvent::StageTransitioned {
                order_id,
                from_stage,
                to_stage,
                sla_status,
            } => info!(
                order_id = %order_id,
                from = %from_stage,
                to = %to_stage,
                sla_status = %sla_status,
                "Work order changed stage"
            ),
            NotificationEvent::SlaThresholdCrossed {
                order_id,
                stage,
                sla_status,
                previous_status,
            } => warn!(
                order_id = %order_id,
                stage = %stage,
                sla_status = %sla_status,
                previous = %previous_status,
                "SLA threshold crossed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transitioned() -> NotificationEvent {
        NotificationEvent::StageTransitioned {
            order_id: "OT-1".to_string(),
            from_stage: "RECEPCION".to_string(),
            to_stage: "INGRESO".to_string(),
            sla_status: SlaStatus::OnTime,
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.notify(transitioned()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.order_id(), "OT-1");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new();
        assert!(notifier.notify(transitioned()).await.is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = NotificationEvent::SlaThresholdCrossed {
            order_id: "OT-9".to_string(),
            stage: "DIAGNOSTICO".to_string(),
            sla_status: SlaStatus::Breached,
            previous_status: SlaStatus::Warning,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sla_threshold_crossed");
        assert_eq!(json["sla_status"], "BREACHED");
        assert_eq!(json["previous_status"], "WARNING");
    }
}
