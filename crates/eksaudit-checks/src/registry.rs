//! Control registry - index of all declared controls

use eksaudit_core::{Control, Error, Result, Severity};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of declared controls, ordered by id
///
/// Controls are immutable once registered and are handed out as `Arc`s so
/// concurrent runs can share them.
#[derive(Debug)]
pub struct ControlRegistry {
    controls: BTreeMap<String, Arc<Control>>,
}

impl ControlRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            controls: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in CIS Amazon EKS controls
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for control in crate::eks::builtin_controls() {
            registry.controls.insert(control.id.clone(), Arc::new(control));
        }
        registry
    }

    /// Register a control; ids must be unique
    pub fn register(&mut self, control: Control) -> Result<()> {
        if self.controls.contains_key(&control.id) {
            return Err(Error::DuplicateControl {
                control_id: control.id,
            });
        }
        self.controls.insert(control.id.clone(), Arc::new(control));
        Ok(())
    }

    /// Get a control by ID
    pub fn get(&self, id: &str) -> Option<Arc<Control>> {
        self.controls.get(id).cloned()
    }

    /// Get all control IDs in order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.controls.keys().map(|s| s.as_str())
    }

    /// Get all controls in id order
    pub fn all(&self) -> Vec<Arc<Control>> {
        self.controls.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Controls with the given IDs; unknown IDs are an error
    pub fn by_ids(&self, ids: &[String]) -> Result<Vec<Arc<Control>>> {
        ids.iter()
            .map(|id| {
                self.get(id).ok_or_else(|| Error::ControlNotFound {
                    control_id: id.clone(),
                })
            })
            .collect()
    }

    /// Filter controls by minimum severity
    pub fn by_min_severity(&self, min_severity: Severity) -> Vec<Arc<Control>> {
        self.controls
            .values()
            .filter(|c| c.severity >= min_severity)
            .cloned()
            .collect()
    }

    /// Controls mapped to a compliance framework (e.g. `nist`)
    pub fn by_framework(&self, framework: &str) -> Vec<Arc<Control>> {
        self.controls
            .values()
            .filter(|c| c.tags.has_framework(framework))
            .cloned()
            .collect()
    }

    /// Controls that carry an automated check
    pub fn with_automated_checks(&self) -> Vec<Arc<Control>> {
        self.controls
            .values()
            .filter(|c| c.is_automated())
            .cloned()
            .collect()
    }
}

impl Default for ControlRegistry {
    fn default() -> Self {
        Self::new()
    }
}
