//! EKS Audit Checks - Control registry, YAML loader, and the built-in control bundle
//!
//! This crate provides:
//! - `ControlRegistry`: index of all declared controls
//! - Loader for declarative YAML control definitions
//! - The CIS Amazon EKS benchmark controls and the inputs they consume

pub mod eks;
pub mod loader;
pub mod registry;

pub use loader::{load_controls_from_dir, load_into};
pub use registry::ControlRegistry;
