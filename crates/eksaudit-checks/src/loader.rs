//! Control loader - loads control definitions from YAML files

use crate::ControlRegistry;
use eksaudit_core::{Control, Error, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Load all controls from a directory into a fresh registry
pub fn load_controls_from_dir(dir: impl AsRef<Path>) -> Result<ControlRegistry> {
    let mut registry = ControlRegistry::new();
    load_into(&mut registry, dir)?;
    Ok(registry)
}

/// Load all controls from a directory into an existing registry
///
/// Files that fail to parse, and controls whose id is already registered,
/// are logged and skipped. Returns the number of controls added.
pub fn load_into(registry: &mut ControlRegistry, dir: impl AsRef<Path>) -> Result<usize> {
    let dir = dir.as_ref();

    if !dir.exists() {
        return Err(Error::FileNotFound {
            path: dir.display().to_string(),
        });
    }

    info!("Loading controls from: {}", dir.display());
    let before = registry.len();
    load_recursive(registry, dir)?;

    let added = registry.len() - before;
    info!("Loaded {} controls", added);
    Ok(added)
}

fn load_recursive(registry: &mut ControlRegistry, dir: &Path) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            load_recursive(registry, &path)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_yaml_controls(&path) {
                    Ok(controls) => {
                        for control in controls {
                            let id = control.id.clone();
                            match registry.register(control) {
                                Ok(()) => debug!("Loaded control: {} from {}", id, path.display()),
                                Err(e) => warn!("Skipping control from {}: {}", path.display(), e),
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to load controls from {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Parse one file holding either a single control or a list of controls
pub fn load_yaml_controls(path: &Path) -> Result<Vec<Control>> {
    let content = std::fs::read_to_string(path)?;
    parse_controls(&content).map_err(|e| Error::InvalidControlDefinition {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn parse_controls(content: &str) -> std::result::Result<Vec<Control>, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    if value.is_sequence() {
        serde_yaml::from_value(value)
    } else {
        serde_yaml::from_value(value).map(|control| vec![control])
    }
}
