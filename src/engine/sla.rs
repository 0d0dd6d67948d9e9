//! SLA evaluation.
//!
//! SLA status is derived, never stored as truth: it is a pure function of a
//! stage definition and the active seconds spent in that stage.

use serde::{Deserialize, Serialize};

use crate::catalog::StageDefinition;

/// SLA status, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    OnTime,
    Warning,
    Critical,
    Breached,
}

impl SlaStatus {
    pub const ALL: [SlaStatus; 4] = [
        SlaStatus::OnTime,
        SlaStatus::Warning,
        SlaStatus::Critical,
        SlaStatus::Breached,
    ];

    /// Statuses that raise an alert when first reached.
    pub fn is_alerting(&self) -> bool {
        matches!(self, SlaStatus::Critical | SlaStatus::Breached)
    }
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnTime => f.pad("ON_TIME"),
            Self::Warning => f.pad("WARNING"),
            Self::Critical => f.pad("CRITICAL"),
            Self::Breached => f.pad("BREACHED"),
        }
    }
}

impl std::str::FromStr for SlaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON_TIME" => Ok(Self::OnTime),
            "WARNING" => Ok(Self::Warning),
            "CRITICAL" => Ok(Self::Critical),
            "BREACHED" => Ok(Self::Breached),
            _ => Err(format!("Unknown SLA status: {}", s)),
        }
    }
}

/// Evaluate the SLA status of `active_seconds` spent in `stage`.
///
/// Stages without an SLA (`sla_hours == 0`) are always on time.
pub fn evaluate(stage: &StageDefinition, active_seconds: u64) -> SlaStatus {
    if !stage.has_sla() {
        return SlaStatus::OnTime;
    }
    if active_seconds >= stage.sla_seconds() {
        SlaStatus::Breached
    } else if active_seconds >= stage.critical_seconds() {
        SlaStatus::Critical
    } else if active_seconds >= stage.warning_seconds() {
        SlaStatus::Warning
    } else {
        SlaStatus::OnTime
    }
}

/// SLA status with the figures a dashboard shows next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaEvaluation {
    pub status: SlaStatus,
    pub active_seconds: u64,
    /// None when the stage has no SLA.
    pub sla_seconds: Option<u64>,
    /// Seconds left before breach; negative once breached.
    pub remaining_seconds: Option<i64>,
    pub percent_used: Option<f64>,
}

pub fn evaluate_detailed(stage: &StageDefinition, active_seconds: u64) -> SlaEvaluation {
    let status = evaluate(stage, active_seconds);
    if !stage.has_sla() {
        return SlaEvaluation {
            status,
            active_seconds,
            sla_seconds: None,
            remaining_seconds: None,
            percent_used: None,
        };
    }

    let sla = stage.sla_seconds();
    SlaEvaluation {
        status,
        active_seconds,
        sla_seconds: Some(sla),
        remaining_seconds: Some(sla as i64 - active_seconds as i64),
        percent_used: Some(if sla == 0 {
            100.0
        } else {
            (active_seconds as f64 / sla as f64 * 1000.0).round() / 10.0
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::stages::{default_stages, ESPERA};
    use proptest::prelude::*;

    fn stage(sla: f64, warning: f64, critical: f64) -> StageDefinition {
        StageDefinition {
            id: "DIAGNOSTICO".into(),
            name: "Diagnóstico".into(),
            order: 3,
            sla_hours: sla,
            warning_threshold_hours: warning,
            critical_threshold_hours: critical,
            color: "#6f42c1".into(),
            allowed_transitions: vec![],
            is_active: true,
        }
    }

    #[test]
    fn test_threshold_scenario() {
        let s = stage(8.0, 6.0, 7.0);
        assert_eq!(evaluate(&s, 0), SlaStatus::OnTime);
        assert_eq!(evaluate(&s, 6 * 3600 - 1), SlaStatus::OnTime);
        assert_eq!(evaluate(&s, 6 * 3600), SlaStatus::Warning);
        assert_eq!(evaluate(&s, 7 * 3600), SlaStatus::Critical);
        assert_eq!(evaluate(&s, 7 * 3600 + 1), SlaStatus::Critical);
        assert_eq!(evaluate(&s, 8 * 3600 - 1), SlaStatus::Critical);
        assert_eq!(evaluate(&s, 8 * 3600), SlaStatus::Breached);
    }

    #[test]
    fn test_wait_stage_never_breaches() {
        let espera = default_stages().into_iter().find(|s| s.id == ESPERA).unwrap();
        assert_eq!(evaluate(&espera, 0), SlaStatus::OnTime);
        assert_eq!(evaluate(&espera, 10_000_000), SlaStatus::OnTime);
        let detail = evaluate_detailed(&espera, 500);
        assert_eq!(detail.sla_seconds, None);
        assert_eq!(detail.remaining_seconds, None);
    }

    #[test]
    fn test_detailed_figures() {
        let s = stage(8.0, 6.0, 7.0);
        let detail = evaluate_detailed(&s, 4 * 3600);
        assert_eq!(detail.status, SlaStatus::OnTime);
        assert_eq!(detail.sla_seconds, Some(8 * 3600));
        assert_eq!(detail.remaining_seconds, Some(4 * 3600));
        assert_eq!(detail.percent_used, Some(50.0));

        let late = evaluate_detailed(&s, 9 * 3600);
        assert_eq!(late.remaining_seconds, Some(-3600));
    }

    #[test]
    fn test_ordering_and_alerting() {
        assert!(SlaStatus::OnTime < SlaStatus::Warning);
        assert!(SlaStatus::Critical < SlaStatus::Breached);
        assert!(!SlaStatus::Warning.is_alerting());
        assert!(SlaStatus::Critical.is_alerting());
    }

    #[test]
    fn test_status_round_trips_through_string() {
        for status in SlaStatus::ALL {
            assert_eq!(status.to_string().parse::<SlaStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&SlaStatus::OnTime).unwrap(),
            "\"ON_TIME\""
        );
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_pure(secs in 0u64..200_000) {
            let s = stage(8.0, 6.0, 7.0);
            prop_assert_eq!(evaluate(&s, secs), evaluate(&s, secs));
        }

        #[test]
        fn prop_status_never_improves_with_more_time(a in 0u64..200_000, b in 0u64..200_000) {
            let s = stage(8.0, 6.0, 7.0);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(evaluate(&s, lo) <= evaluate(&s, hi));
        }
    }
}
