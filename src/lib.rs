//! tallerflow - work-order lifecycle and SLA engine for vehicle repair shops
//!
//! Every work order moves through an ordered catalog of repair stages
//! (reception, intake, diagnosis, quote approval, disassembly, wait,
//! reassembly, quality check, delivery). Each stage carries an SLA budget
//! of active hours. A per-order timer counts active time in the current
//! stage and can be paused for a wait cause without eating into the SLA.
//!
//! ## Key Features
//!
//! - **Atomic transitions**: closing a stage visit, opening the next and
//!   restarting the timer commit together or not at all
//! - **Per-order serialization**: concurrent writers to one order fail fast
//!   with a typed error instead of corrupting its timer
//! - **Derived SLA status**: ON_TIME / WARNING / CRITICAL / BREACHED from one
//!   pure evaluator
//! - **Edge-triggered alerts**: a periodic sweep raises each threshold
//!   crossing once
//!
//! ## Catalog example
//!
//! ```yaml
//! stages:
//!   - id: DIAGNOSTICO
//!     name: Diagnóstico
//!     order: 3
//!     sla_hours: 8
//!     warning_threshold_hours: 6
//!     critical_threshold_hours: 7
//!     allowed_transitions: [APROBACION_COTIZACION, ESPERA]
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod storage;
pub mod sweep;

pub use error::{Error, Result};
