//! Stage catalog and wait-cause registry.
//!
//! The catalog is loaded once at startup (or on an explicit admin reload) and
//! read by every engine call. Readers hold an `Arc` to an immutable, versioned
//! [`StageCatalog`] snapshot; a reload builds a new snapshot and swaps it in
//! whole, so an in-flight transition always finishes against the snapshot it
//! started with.

mod parser;
pub mod stages;
mod validator;
pub mod wait_causes;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use parser::{parse_catalog, parse_catalog_file, CatalogDocument};
pub use stages::{default_stages, StageDefinition};
pub use validator::validate_catalog;
pub use wait_causes::{default_wait_causes, WaitCause};

use crate::error::{Error, Result};

/// Immutable, versioned catalog snapshot.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    version: u64,
    stages: Vec<StageDefinition>,
    index: HashMap<String, usize>,
    wait_causes: Vec<WaitCause>,
}

impl StageCatalog {
    /// Build a validated snapshot. Stages are sorted by `order`, wait causes by `sort_order`.
    pub fn new(
        version: u64,
        mut stages: Vec<StageDefinition>,
        mut wait_causes: Vec<WaitCause>,
    ) -> Result<Self> {
        validate_catalog(&stages, &wait_causes)?;

        stages.sort_by_key(|s| s.order);
        wait_causes.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));

        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        Ok(Self {
            version,
            stages,
            index,
            wait_causes,
        })
    }

    /// The built-in repair-shop catalog.
    pub fn defaults() -> Self {
        let stages = default_stages();
        let wait_causes = default_wait_causes();
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self {
            version: 1,
            stages,
            index,
            wait_causes,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get_stage(&self, id: &str) -> Result<&StageDefinition> {
        self.index
            .get(id)
            .map(|&i| &self.stages[i])
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }

    /// All stages in workflow order.
    pub fn list_stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Whether a work order may move directly from `from_id` to `to_id`.
    ///
    /// Unknown stages, inactive targets and self-transitions are never allowed.
    pub fn is_transition_allowed(&self, from_id: &str, to_id: &str) -> bool {
        if from_id == to_id {
            return false;
        }
        match (self.get_stage(from_id), self.get_stage(to_id)) {
            (Ok(from), Ok(to)) => to.is_active && from.can_transition_to(to_id),
            _ => false,
        }
    }

    /// The stage new work orders enter: the active stage with the lowest order.
    pub fn initial_stage(&self) -> Result<&StageDefinition> {
        self.stages
            .iter()
            .find(|s| s.is_active)
            .ok_or_else(|| Error::Internal("Catalog has no active stage".to_string()))
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.get_stage(id).map(|s| s.is_terminal()).unwrap_or(false)
    }

    pub fn wait_cause(&self, id: &str) -> Option<&WaitCause> {
        self.wait_causes.iter().find(|c| c.id == id)
    }

    /// Look up a wait cause that may be used for a new pause.
    pub fn active_wait_cause(&self, id: &str) -> Result<&WaitCause> {
        self.wait_cause(id)
            .filter(|c| c.is_active)
            .ok_or_else(|| Error::UnknownWaitCause(id.to_string()))
    }

    pub fn list_wait_causes(&self) -> &[WaitCause] {
        &self.wait_causes
    }
}

/// Shared handle to the current catalog snapshot.
#[derive(Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<StageCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: StageCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Get the snapshot active right now.
    pub fn snapshot(&self) -> Arc<StageCatalog> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Validate and atomically install a new catalog. Returns the new snapshot.
    ///
    /// The version is bumped past the current one; invalid catalogs leave the
    /// current snapshot in place.
    pub fn replace(
        &self,
        stages: Vec<StageDefinition>,
        wait_causes: Vec<WaitCause>,
    ) -> Result<Arc<StageCatalog>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(StageCatalog::new(
            guard.version() + 1,
            stages,
            wait_causes,
        )?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(StageCatalog::defaults())
    }
}
