//! Outcomes of running a control

use crate::control::{ComplianceTags, Control};
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Terminal result of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    /// Not applicable: a precondition was unmet or the control is manual-only
    Skipped,
    /// Facts could not be read, or the run was cancelled
    Errored,
}

impl Outcome {
    pub fn all() -> [Outcome; 4] {
        [
            Outcome::Passed,
            Outcome::Failed,
            Outcome::Skipped,
            Outcome::Errored,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Errored => "errored",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-control report row
///
/// Severity and tags are copied from the control so the record can be
/// rendered without going back to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub id: String,
    pub title: String,
    pub outcome: Outcome,
    pub severity: Severity,
    pub impact: f32,
    pub tags: ComplianceTags,
    /// Always non-empty
    pub explanation: String,
    pub duration_ms: u64,
}

impl ControlRecord {
    fn build(control: &Control, outcome: Outcome, explanation: &str) -> Self {
        let explanation = if explanation.trim().is_empty() {
            format!("control {} {}", control.id, outcome)
        } else {
            explanation.to_string()
        };

        Self {
            id: control.id.clone(),
            title: control.title.clone(),
            outcome,
            severity: control.severity,
            impact: control.impact,
            tags: control.tags.clone(),
            explanation,
            duration_ms: 0,
        }
    }

    pub fn passed(control: &Control, explanation: &str) -> Self {
        Self::build(control, Outcome::Passed, explanation)
    }

    pub fn failed(control: &Control, explanation: &str) -> Self {
        Self::build(control, Outcome::Failed, explanation)
    }

    pub fn skipped(control: &Control, explanation: &str) -> Self {
        Self::build(control, Outcome::Skipped, explanation)
    }

    pub fn errored(control: &Control, explanation: &str) -> Self {
        Self::build(control, Outcome::Errored, explanation)
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explanation_never_empty() {
        let control = Control::new("eks-cis-4.1.4", "draft", 0.5);
        let record = ControlRecord::skipped(&control, "  ");
        assert_eq!(record.outcome, Outcome::Skipped);
        assert_eq!(record.explanation, "control eks-cis-4.1.4 skipped");
        assert_eq!(record.severity, Severity::Medium);
    }

    #[test]
    fn test_outcome_serde() {
        let json = serde_json::to_string(&Outcome::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }
}
