//! Control definitions - the declarative unit of compliance

use crate::assertion::Assertion;
use crate::fact::FactSelector;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compliance control
///
/// Narrative fields are opaque text and are never parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ControlDef")]
pub struct Control {
    /// Globally unique identifier (e.g. `eks-cis-3.1.2`)
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// Short description
    #[serde(default)]
    pub description: Option<String>,

    /// Why the control matters
    #[serde(default)]
    pub rationale: String,

    /// Manual audit instructions
    #[serde(default)]
    pub check_text: String,

    /// Manual remediation instructions
    #[serde(default)]
    pub fix_text: String,

    /// Impact score in 0.0 - 1.0
    #[serde(default = "default_impact")]
    pub impact: f32,

    /// Qualitative severity
    pub severity: Severity,

    /// Compliance framework mappings
    #[serde(default)]
    pub tags: ComplianceTags,

    /// Automated check, if any
    #[serde(default)]
    pub check: CheckProcedure,
}

fn default_impact() -> f32 {
    0.5
}

/// Serialized form of a control; severity falls back to the impact score
#[derive(Deserialize)]
struct ControlDef {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    check_text: String,
    #[serde(default)]
    fix_text: String,
    #[serde(default = "default_impact")]
    impact: f32,
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    tags: ComplianceTags,
    #[serde(default)]
    check: CheckProcedure,
}

impl From<ControlDef> for Control {
    fn from(def: ControlDef) -> Self {
        Self {
            id: def.id,
            title: def.title,
            description: def.description,
            rationale: def.rationale,
            check_text: def.check_text,
            fix_text: def.fix_text,
            impact: def.impact,
            severity: def
                .severity
                .unwrap_or_else(|| Severity::from_impact(def.impact)),
            tags: def.tags,
            check: def.check,
        }
    }
}

impl Control {
    /// Create a control with no automated check
    pub fn new(id: impl Into<String>, title: impl Into<String>, impact: f32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            rationale: String::new(),
            check_text: String::new(),
            fix_text: String::new(),
            impact,
            severity: Severity::from_impact(impact),
            tags: ComplianceTags::default(),
            check: CheckProcedure::Manual,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_rationale(mut self, text: impl Into<String>) -> Self {
        self.rationale = text.into();
        self
    }

    pub fn with_check_text(mut self, text: impl Into<String>) -> Self {
        self.check_text = text.into();
        self
    }

    pub fn with_fix_text(mut self, text: impl Into<String>) -> Self {
        self.fix_text = text.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tags(mut self, tags: ComplianceTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_plan(mut self, plan: CheckPlan) -> Self {
        self.check = CheckProcedure::Automated(plan);
        self
    }

    /// Whether the control has an automated check
    pub fn is_automated(&self) -> bool {
        matches!(self.check, CheckProcedure::Automated(_))
    }
}

/// Framework name -> section identifiers (e.g. `nist` -> `[CM-6, Rev_4]`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceTags {
    #[serde(flatten)]
    pub frameworks: BTreeMap<String, Vec<String>>,

    /// CIS profile level (1 or 2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cis_level: Option<u8>,
}

impl ComplianceTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add sections under a framework
    pub fn with<I, S>(mut self, framework: impl Into<String>, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks
            .entry(framework.into())
            .or_default()
            .extend(sections.into_iter().map(Into::into));
        self
    }

    pub fn with_cis_level(mut self, level: u8) -> Self {
        self.cis_level = Some(level);
        self
    }

    pub fn sections(&self, framework: &str) -> &[String] {
        self.frameworks
            .get(framework)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_framework(&self, framework: &str) -> bool {
        self.frameworks.contains_key(framework)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &str> {
        self.frameworks.keys().map(|s| s.as_str())
    }
}

/// How a control is checked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CheckProcedure {
    /// No automated check; always reported as skipped for manual review
    #[default]
    Manual,
    /// Evaluated by the engine from a declarative plan
    Automated(CheckPlan),
}

/// Declarative check: gates, then fallback strategies in priority order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckPlan {
    /// Must all hold before anything else is read; otherwise the control is skipped
    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    /// Alternatives in priority order; the first whose `requires` hold is used exclusively
    pub strategies: Vec<Strategy>,
}

impl CheckPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Shorthand for a plan with a single strategy that has no extra requirements
    pub fn single(mode: CompositeMode, probes: Vec<Probe>) -> Self {
        Self::new().strategy(Strategy::new("default", mode).with_probes(probes))
    }
}

/// A gate evaluated before facts are fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "kebab-case")]
pub enum Precondition {
    /// A named input must resolve to a non-empty value
    InputSet(String),
    /// A service must be running
    ServiceRunning(String),
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::InputSet(name) => write!(f, "input '{}' is set", name),
            Precondition::ServiceRunning(service) => write!(f, "service {} is running", service),
        }
    }
}

/// How probe results combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositeMode {
    /// Every probe must pass
    #[default]
    All,
    /// At least one probe must pass; fetch failures count as failing alternatives
    AnyOf,
}

/// One way of checking a control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,

    /// Inputs or services this strategy needs
    #[serde(default)]
    pub requires: Vec<Precondition>,

    #[serde(default)]
    pub mode: CompositeMode,

    pub probes: Vec<Probe>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, mode: CompositeMode) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            mode,
            probes: Vec::new(),
        }
    }

    pub fn requires(mut self, precondition: Precondition) -> Self {
        self.requires.push(precondition);
        self
    }

    pub fn probe(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes.extend(probes);
        self
    }
}

/// A fact selector paired with the assertion applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub selector: FactSelector,
    pub assertion: Assertion,

    /// Fetch failures on an optional probe count as a failed assertion, not an error
    #[serde(default)]
    pub optional: bool,
}

impl Probe {
    pub fn new(selector: FactSelector, assertion: Assertion) -> Self {
        Self {
            selector,
            assertion,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Subject;

    #[test]
    fn test_control_builder() {
        let control = Control::new("eks-cis-3.1.2", "kubeconfig ownership", 0.5)
            .with_tags(
                ComplianceTags::new()
                    .with("nist", ["CM-6", "Rev_4"])
                    .with("cis_rid", ["3.1.2"])
                    .with_cis_level(1),
            )
            .with_plan(CheckPlan::single(
                CompositeMode::All,
                vec![Probe::new(
                    FactSelector::FileOwnership {
                        path: "{kubeconfig}".into(),
                    },
                    Assertion::equals(Subject::Owner, "root"),
                )],
            ));

        assert_eq!(control.severity, Severity::Medium);
        assert!(control.is_automated());
        assert_eq!(control.tags.sections("nist"), ["CM-6", "Rev_4"]);
        assert!(control.tags.sections("cis_controls").is_empty());
    }

    #[test]
    fn test_manual_is_default() {
        let yaml = r#"
id: eks-cis-4.1.4
title: draft
impact: 0.5
severity: medium
tags:
  nist: [CM-6, Rev_4]
  cis_level: 1
"#;
        let control: Control = serde_yaml::from_str(yaml).unwrap();
        assert!(!control.is_automated());
        assert_eq!(control.tags.cis_level, Some(1));
        assert_eq!(control.tags.sections("nist"), ["CM-6", "Rev_4"]);
    }

    #[test]
    fn test_severity_follows_impact_when_omitted() {
        let control: Control =
            serde_yaml::from_str("id: custom-high\ntitle: t\nimpact: 0.7\n").unwrap();
        assert_eq!(control.severity, Severity::High);

        let control: Control =
            serde_yaml::from_str("id: custom-low\ntitle: t\nimpact: 0.7\nseverity: low\n").unwrap();
        assert_eq!(control.severity, Severity::Low);

        let control: Control = serde_yaml::from_str("id: custom-default\ntitle: t\n").unwrap();
        assert_eq!(control.severity, Severity::Medium);
    }

    #[test]
    fn test_automated_yaml_form() {
        let yaml = r#"
id: custom-1
title: kubelet config is root owned
severity: high
check:
  kind: automated
  preconditions:
    - type: service-running
      name: kubelet
  strategies:
    - name: local
      requires:
        - type: input-set
          name: kubelet_config
      mode: all
      probes:
        - selector:
            type: file-ownership
            path: "{kubelet_config}"
          assertion:
            subject: owner
            predicate:
              op: equals
              expected: root
"#;
        let control: Control = serde_yaml::from_str(yaml).unwrap();
        let CheckProcedure::Automated(plan) = &control.check else {
            panic!("expected automated check");
        };
        assert_eq!(
            plan.preconditions,
            vec![Precondition::ServiceRunning("kubelet".into())]
        );
        assert_eq!(plan.strategies.len(), 1);
        assert_eq!(plan.strategies[0].probes.len(), 1);
        assert!(!plan.strategies[0].probes[0].optional);
    }
}
