//! Catalog validation.

use std::collections::HashSet;

use super::stages::StageDefinition;
use super::wait_causes::WaitCause;
use crate::error::{Error, Result};

/// Validate a stage catalog together with its wait causes.
///
/// Checks for:
/// - At least one active stage and at least one terminal stage
/// - Unique, well-formed stage ids and unique ordering positions
/// - `warning <= critical <= sla` for every stage with an SLA
/// - Transitions that reference existing stages, without self-loops
/// - Unique, named wait causes
pub fn validate_catalog(stages: &[StageDefinition], wait_causes: &[WaitCause]) -> Result<()> {
    if stages.is_empty() {
        return Err(Error::Validation("Catalog must define at least one stage".into()));
    }

    let mut ids = HashSet::new();
    let mut orders = HashSet::new();
    for stage in stages {
        validate_id("Stage", &stage.id)?;
        if stage.name.trim().is_empty() {
            return Err(Error::Validation(format!("Stage '{}' has no name", stage.id)));
        }
        if !ids.insert(stage.id.as_str()) {
            return Err(Error::Validation(format!("Duplicate stage ID: {}", stage.id)));
        }
        if !orders.insert(stage.order) {
            return Err(Error::Validation(format!(
                "Stage '{}' reuses order position {}",
                stage.id, stage.order
            )));
        }
        validate_thresholds(stage)?;
    }

    for stage in stages {
        let mut seen = HashSet::new();
        for next in &stage.allowed_transitions {
            if next == &stage.id {
                return Err(Error::Validation(format!(
                    "Stage '{}' cannot transition to itself",
                    stage.id
                )));
            }
            if !ids.contains(next.as_str()) {
                return Err(Error::Validation(format!(
                    "Stage '{}' transitions to non-existent stage '{}'",
                    stage.id, next
                )));
            }
            if !seen.insert(next.as_str()) {
                return Err(Error::Validation(format!(
                    "Stage '{}' lists transition to '{}' twice",
                    stage.id, next
                )));
            }
        }
    }

    if !stages.iter().any(|s| s.is_active) {
        return Err(Error::Validation("Catalog has no active stage".into()));
    }
    if !stages.iter().any(|s| s.is_terminal()) {
        return Err(Error::Validation(
            "Catalog must contain a terminal stage (no outgoing transitions)".into(),
        ));
    }

    let mut cause_ids = HashSet::new();
    for cause in wait_causes {
        validate_id("Wait cause", &cause.id)?;
        if cause.name.trim().is_empty() {
            return Err(Error::Validation(format!("Wait cause '{}' has no name", cause.id)));
        }
        if !cause_ids.insert(cause.id.as_str()) {
            return Err(Error::Validation(format!("Duplicate wait cause ID: {}", cause.id)));
        }
    }

    Ok(())
}

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Validation(format!("{} ID cannot be empty", kind)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!(
            "{} ID '{}' must contain only alphanumeric characters, hyphens, and underscores",
            kind, id
        )));
    }
    Ok(())
}

fn validate_thresholds(stage: &StageDefinition) -> Result<()> {
    let values = [
        stage.sla_hours,
        stage.warning_threshold_hours,
        stage.critical_threshold_hours,
    ];
    if values.iter().any(|h| !h.is_finite() || *h < 0.0) {
        return Err(Error::Validation(format!(
            "Stage '{}' has negative or non-finite hours",
            stage.id
        )));
    }

    // slaHours = 0 means no SLA; thresholds are ignored.
    if !stage.has_sla() {
        return Ok(());
    }

    if stage.warning_threshold_hours > stage.critical_threshold_hours
        || stage.critical_threshold_hours > stage.sla_hours
    {
        return Err(Error::Validation(format!(
            "Stage '{}' thresholds must satisfy warning ({}) <= critical ({}) <= sla ({})",
            stage.id,
            stage.warning_threshold_hours,
            stage.critical_threshold_hours,
            stage.sla_hours
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::stages::{default_stages, ENTREGA, RECEPCION};
    use crate::catalog::wait_causes::default_wait_causes;

    #[test]
    fn test_default_catalog_is_valid() {
        validate_catalog(&default_stages(), &default_wait_causes()).unwrap();
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut stages = default_stages();
        stages[1].warning_threshold_hours = 3.9;
        stages[1].critical_threshold_hours = 3.0;
        let err = validate_catalog(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("warning"));
    }

    #[test]
    fn test_rejects_critical_above_sla() {
        let mut stages = default_stages();
        stages[2].critical_threshold_hours = 9.0;
        assert!(validate_catalog(&stages, &[]).is_err());
    }

    #[test]
    fn test_zero_sla_ignores_thresholds() {
        let mut stages = default_stages();
        let espera = stages.iter_mut().find(|s| !s.has_sla()).unwrap();
        espera.warning_threshold_hours = 5.0;
        validate_catalog(&stages, &[]).unwrap();
    }

    #[test]
    fn test_rejects_unknown_transition_target() {
        let mut stages = default_stages();
        stages[0].allowed_transitions.push("LAVADO".into());
        let err = validate_catalog(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("LAVADO"));
    }

    #[test]
    fn test_rejects_self_transition() {
        let mut stages = default_stages();
        stages[0].allowed_transitions.push(RECEPCION.into());
        assert!(validate_catalog(&stages, &[]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_stage_ids() {
        let mut stages = default_stages();
        let mut dup = stages[0].clone();
        dup.order = 99;
        stages.push(dup);
        let err = validate_catalog(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("Duplicate stage ID"));
    }

    #[test]
    fn test_requires_terminal_stage() {
        let mut stages = default_stages();
        let entrega = stages.iter_mut().find(|s| s.id == ENTREGA).unwrap();
        entrega.allowed_transitions.push(RECEPCION.into());
        let err = validate_catalog(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_rejects_duplicate_wait_cause() {
        let mut causes = default_wait_causes();
        causes.push(causes[0].clone());
        assert!(validate_catalog(&default_stages(), &causes).is_err());
    }

    #[test]
    fn test_rejects_bad_id_characters() {
        let mut causes = default_wait_causes();
        causes[0].id = "parts wait".into();
        assert!(validate_catalog(&default_stages(), &causes).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_thresholds_accepted_iff_ordered(
            sla in 0.0f64..48.0,
            warning in 0.0f64..48.0,
            critical in 0.0f64..48.0,
        ) {
            let mut stages = default_stages();
            stages[2].sla_hours = sla;
            stages[2].warning_threshold_hours = warning;
            stages[2].critical_threshold_hours = critical;

            let ordered = sla == 0.0 || (warning <= critical && critical <= sla);
            prop_assert_eq!(validate_catalog(&stages, &[]).is_ok(), ordered);
        }
    }
}
