//! EKS Audit Common - Shared utilities: logging, configuration, input resolution
//!
//! This crate provides common functionality used across all EKS audit crates.

pub mod config;
pub mod inputs;
pub mod logging;

pub use config::{Config, ConfigBuilder};
pub use inputs::{InputDecl, InputResolver, InputType, InputValue, Inputs};
pub use logging::init_logging;
