//! Workflow stage definitions.

use serde::{Deserialize, Serialize};

/// Stage a new work order enters.
pub const RECEPCION: &str = "RECEPCION";
pub const INGRESO: &str = "INGRESO";
pub const DIAGNOSTICO: &str = "DIAGNOSTICO";
pub const APROBACION_COTIZACION: &str = "APROBACION_COTIZACION";
pub const DESARME: &str = "DESARME";
/// Stage with no SLA, used when waiting deserves its own history record.
pub const ESPERA: &str = "ESPERA";
pub const ARMADO: &str = "ARMADO";
pub const CONTROL_CALIDAD: &str = "CONTROL_CALIDAD";
/// Terminal stage.
pub const ENTREGA: &str = "ENTREGA";

const SECONDS_PER_HOUR: f64 = 3600.0;

/// One ordered phase of a work order's repair lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    pub name: String,
    /// Position in the workflow sequence.
    pub order: u32,
    /// Budgeted active hours. Zero means no SLA applies.
    #[serde(default)]
    pub sla_hours: f64,
    #[serde(default)]
    pub warning_threshold_hours: f64,
    #[serde(default)]
    pub critical_threshold_hours: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub allowed_transitions: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_color() -> String {
    "#6c757d".to_string()
}

fn default_active() -> bool {
    true
}

impl StageDefinition {
    /// Whether an SLA applies to time spent in this stage.
    pub fn has_sla(&self) -> bool {
        self.sla_hours > 0.0
    }

    /// A stage with no outgoing transitions ends the workflow.
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions.is_empty()
    }

    pub fn can_transition_to(&self, stage_id: &str) -> bool {
        self.allowed_transitions.iter().any(|s| s == stage_id)
    }

    pub fn sla_seconds(&self) -> u64 {
        hours_to_seconds(self.sla_hours)
    }

    pub fn warning_seconds(&self) -> u64 {
        hours_to_seconds(self.warning_threshold_hours)
    }

    pub fn critical_seconds(&self) -> u64 {
        hours_to_seconds(self.critical_threshold_hours)
    }
}

fn hours_to_seconds(hours: f64) -> u64 {
    if hours <= 0.0 || !hours.is_finite() {
        return 0;
    }
    (hours * SECONDS_PER_HOUR).round() as u64
}

#[allow(clippy::too_many_arguments)]
fn stage(
    id: &str,
    name: &str,
    order: u32,
    sla: f64,
    warning: f64,
    critical: f64,
    color: &str,
    next: &[&str],
) -> StageDefinition {
    StageDefinition {
        id: id.to_string(),
        name: name.to_string(),
        order,
        sla_hours: sla,
        warning_threshold_hours: warning,
        critical_threshold_hours: critical,
        color: color.to_string(),
        allowed_transitions: next.iter().map(|s| s.to_string()).collect(),
        is_active: true,
    }
}

/// The stage catalog a fresh installation starts with.
pub fn default_stages() -> Vec<StageDefinition> {
    vec![
        stage(RECEPCION, "Recepción", 1, 2.0, 1.0, 1.5, "#0d6efd", &[INGRESO]),
        stage(
            INGRESO,
            "Ingreso",
            2,
            4.0,
            3.0,
            3.5,
            "#6610f2",
            &[DIAGNOSTICO, ESPERA],
        ),
        stage(
            DIAGNOSTICO,
            "Diagnóstico",
            3,
            8.0,
            6.0,
            7.0,
            "#6f42c1",
            &[APROBACION_COTIZACION, ESPERA],
        ),
        stage(
            APROBACION_COTIZACION,
            "Aprobación de cotización",
            4,
            24.0,
            18.0,
            21.0,
            "#d63384",
            &[DESARME, ESPERA, ENTREGA],
        ),
        stage(
            DESARME,
            "Desarme",
            5,
            8.0,
            6.0,
            7.0,
            "#fd7e14",
            &[ARMADO, ESPERA],
        ),
        stage(
            ESPERA,
            "Espera",
            6,
            0.0,
            0.0,
            0.0,
            "#ffc107",
            &[
                INGRESO,
                DIAGNOSTICO,
                APROBACION_COTIZACION,
                DESARME,
                ARMADO,
                CONTROL_CALIDAD,
            ],
        ),
        stage(
            ARMADO,
            "Armado",
            7,
            16.0,
            12.0,
            14.0,
            "#20c997",
            &[CONTROL_CALIDAD, ESPERA],
        ),
        stage(
            CONTROL_CALIDAD,
            "Control de calidad",
            8,
            4.0,
            3.0,
            3.5,
            "#0dcaf0",
            &[ENTREGA, ARMADO, ESPERA],
        ),
        stage(ENTREGA, "Entrega", 9, 0.0, 0.0, 0.0, "#198754", &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stages_are_ordered() {
        let stages = default_stages();
        assert_eq!(stages.len(), 9);
        assert_eq!(stages[0].id, RECEPCION);
        assert_eq!(stages[8].id, ENTREGA);
        assert!(stages.windows(2).all(|w| w[0].order < w[1].order));
    }

    #[test]
    fn test_thresholds_never_exceed_sla() {
        for s in default_stages() {
            if s.has_sla() {
                assert!(s.warning_threshold_hours <= s.critical_threshold_hours, "{}", s.id);
                assert!(s.critical_threshold_hours <= s.sla_hours, "{}", s.id);
            }
        }
    }

    #[test]
    fn test_only_entrega_is_terminal() {
        let terminal: Vec<_> = default_stages()
            .into_iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.id)
            .collect();
        assert_eq!(terminal, vec![ENTREGA.to_string()]);
    }

    #[test]
    fn test_espera_round_trips_to_active_stages() {
        let stages = default_stages();
        let espera = stages.iter().find(|s| s.id == ESPERA).unwrap();
        assert!(!espera.has_sla());
        for back in &espera.allowed_transitions {
            let active = stages.iter().find(|s| &s.id == back).unwrap();
            assert!(active.can_transition_to(ESPERA), "{} cannot reach ESPERA", back);
        }
    }

    #[test]
    fn test_hours_to_seconds() {
        let diag = default_stages()
            .into_iter()
            .find(|s| s.id == DIAGNOSTICO)
            .unwrap();
        assert_eq!(diag.sla_seconds(), 8 * 3600);
        assert_eq!(diag.warning_seconds(), 6 * 3600);
        assert_eq!(diag.critical_seconds(), 7 * 3600);
        assert_eq!(hours_to_seconds(1.5), 5400);
        assert_eq!(hours_to_seconds(-1.0), 0);
    }
}
