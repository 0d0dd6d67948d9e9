//! Catalog YAML parser.
//!
//! Administrators maintain the catalog as a YAML document:
//!
//! ```yaml
//! stages:
//!   - id: RECEPCION
//!     name: Recepción
//!     order: 1
//!     sla_hours: 2
//!     warning_threshold_hours: 1
//!     critical_threshold_hours: 1.5
//!     allowed_transitions: [INGRESO]
//! wait_causes:
//!   - id: REPUESTOS
//!     name: Repuestos
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::stages::StageDefinition;
use super::validator::validate_catalog;
use super::wait_causes::WaitCause;
use crate::error::{Error, Result};

/// Catalog document as written by administrators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub stages: Vec<StageDefinition>,
    #[serde(default)]
    pub wait_causes: Vec<WaitCause>,
}

/// Parse and validate a catalog from a YAML string.
pub fn parse_catalog(yaml: &str) -> Result<CatalogDocument> {
    if yaml.trim().is_empty() {
        return Err(Error::Parse("Empty catalog definition".to_string()));
    }

    let document: CatalogDocument = serde_yaml::from_str(yaml).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid YAML: {}", msg))
        }
    })?;

    validate_catalog(&document.stages, &document.wait_causes)?;
    Ok(document)
}

/// Parse and validate a catalog from a file path.
pub fn parse_catalog_file(path: &Path) -> Result<CatalogDocument> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_CATALOG: &str = r##"
stages:
  - id: RECEPCION
    name: Recepción
    order: 1
    sla_hours: 2
    warning_threshold_hours: 1
    critical_threshold_hours: 1.5
    allowed_transitions: [DIAGNOSTICO]
  - id: DIAGNOSTICO
    name: Diagnóstico
    order: 2
    sla_hours: 8
    warning_threshold_hours: 6
    critical_threshold_hours: 7
    color: "#6f42c1"
    allowed_transitions: [ENTREGA]
  - id: ENTREGA
    name: Entrega
    order: 3

wait_causes:
  - id: REPUESTOS
    name: Repuestos
    sort_order: 1
"##;

    #[test]
    fn test_parse_small_catalog() {
        let doc = parse_catalog(SMALL_CATALOG).unwrap();
        assert_eq!(doc.stages.len(), 3);
        assert_eq!(doc.stages[1].color, "#6f42c1");
        assert_eq!(doc.stages[0].color, "#6c757d");
        assert!(doc.stages[2].is_terminal());
        assert!(!doc.stages[2].has_sla());
        assert_eq!(doc.wait_causes.len(), 1);
        assert!(doc.wait_causes[0].is_active);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let err = parse_catalog("   ").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_missing_field_reported() {
        let yaml = r#"
stages:
  - id: RECEPCION
    order: 1
"#;
        let err = parse_catalog(yaml).unwrap_err();
        assert!(err.to_string().contains("Missing required field: name"));
    }

    #[test]
    fn test_invalid_thresholds_rejected_at_parse() {
        let yaml = SMALL_CATALOG.replace("critical_threshold_hours: 7", "critical_threshold_hours: 9");
        let err = parse_catalog(&yaml).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_parse_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, SMALL_CATALOG).unwrap();
        let doc = parse_catalog_file(&path).unwrap();
        assert_eq!(doc.stages[0].id, "RECEPCION");
    }
}
