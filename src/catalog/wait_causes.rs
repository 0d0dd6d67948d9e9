//! Wait-cause registry entries.

use serde::{Deserialize, Serialize};

pub const REPUESTOS: &str = "REPUESTOS";
pub const AUTORIZACION_CLIENTE: &str = "AUTORIZACION_CLIENTE";
pub const DEPENDENCIA_EXTERNA: &str = "DEPENDENCIA_EXTERNA";
pub const OTRO: &str = "OTRO";

/// A reason a work-order timer may be paused.
///
/// Causes referenced by recorded pauses are never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitCause {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub sort_order: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_color() -> String {
    "#adb5bd".to_string()
}

fn default_active() -> bool {
    true
}

fn cause(id: &str, name: &str, description: &str, color: &str, sort_order: u32) -> WaitCause {
    WaitCause {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        color: color.to_string(),
        sort_order,
        is_active: true,
    }
}

/// Wait causes a fresh installation starts with.
pub fn default_wait_causes() -> Vec<WaitCause> {
    vec![
        cause(
            REPUESTOS,
            "Repuestos",
            "Esperando la llegada de repuestos",
            "#fd7e14",
            1,
        ),
        cause(
            AUTORIZACION_CLIENTE,
            "Autorización del cliente",
            "Esperando que el cliente apruebe el trabajo",
            "#0dcaf0",
            2,
        ),
        cause(
            DEPENDENCIA_EXTERNA,
            "Dependencia externa",
            "Trabajo subcontratado o servicio de terceros",
            "#6f42c1",
            3,
        ),
        cause(OTRO, "Otro", "Otra causa de espera", "#6c757d", 4),
    ]
}
