//! EKS Audit Core - Foundation types for the compliance evaluation engine
//!
//! This crate provides the data model shared by every other crate:
//! - `Control`: a compliance rule with metadata and an optional check plan
//! - `FactSelector` / `Fact`: what is read from the target and what comes back
//! - `Assertion`: a typed predicate applied to one fact
//! - `Outcome` / `ControlRecord`: the terminal result of running a control
//! - `Severity`, `ComplianceTags`: reporting metadata

pub mod assertion;
pub mod control;
pub mod error;
pub mod fact;
pub mod outcome;
pub mod severity;

// Re-export commonly used types at crate root
pub use assertion::{Assertion, Normalize, Predicate, Subject};
pub use control::{
    CheckPlan, CheckProcedure, ComplianceTags, CompositeMode, Control, Precondition, Probe,
    Strategy,
};
pub use error::{Error, Result};
pub use fact::{Fact, FactSelector, FetchError, FetchErrorKind, ServiceFlags};
pub use outcome::{ControlRecord, Outcome};
pub use severity::Severity;
