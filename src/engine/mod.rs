//! Work-order lifecycle engine.
//!
//! - [`timer`]: per-order active-time clock
//! - [`sla`]: pure SLA evaluation
//! - [`locks`]: per-order mutual exclusion
//! - `workflow`: transitions, pause/resume and reads, persisted through storage

pub mod locks;
pub mod sla;
pub mod timer;
mod workflow;

pub use locks::{OrderGuard, OrderLocks};
pub use sla::{evaluate, evaluate_detailed, SlaEvaluation, SlaStatus};
pub use timer::{TimerState, TimerStatus};
pub use workflow::{
    bootstrap_catalog, Clock, Dashboard, HistoryEntry, OrderStatus, PauseEntry,
    TransitionOptions, TransitionOutcome, WorkflowEngine,
};
