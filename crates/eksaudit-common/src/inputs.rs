//! Input resolution
//!
//! Named run parameters are resolved from three layers, highest first:
//! run-time overrides (CLI pairs, then `EKSAUDIT_INPUT_<NAME>` variables),
//! the profile `[inputs]` table, and the declared default. Resolution never
//! fails; an unconfigured input resolves to its type's zero value.

use eksaudit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Prefix of environment variables that override inputs
pub const INPUT_ENV_PREFIX: &str = "EKSAUDIT_INPUT_";

/// Semantic type of an input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    List,
    Bool,
}

/// A resolved input value
///
/// Numbers in a profile (`proxy_port = 8001`) are kept as their text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "RawInputValue")]
pub enum InputValue {
    Bool(bool),
    List(Vec<String>),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<RawScalar> for String {
    fn from(raw: RawScalar) -> Self {
        match raw {
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::Integer(n) => n.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInputValue {
    Bool(bool),
    List(Vec<RawScalar>),
    Scalar(RawScalar),
}

impl From<RawInputValue> for InputValue {
    fn from(raw: RawInputValue) -> Self {
        match raw {
            RawInputValue::Bool(b) => InputValue::Bool(b),
            RawInputValue::List(items) => {
                InputValue::List(items.into_iter().map(String::from).collect())
            }
            RawInputValue::Scalar(scalar) => InputValue::Text(scalar.into()),
        }
    }
}

impl InputValue {
    pub fn zero(input_type: InputType) -> Self {
        match input_type {
            InputType::String => InputValue::Text(String::new()),
            InputType::List => InputValue::List(Vec::new()),
            InputType::Bool => InputValue::Bool(false),
        }
    }

    /// Parse a raw override string as the given type
    pub fn parse(raw: &str, input_type: InputType) -> Self {
        match input_type {
            InputType::String => InputValue::Text(raw.to_string()),
            InputType::List => InputValue::List(
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            InputType::Bool => InputValue::Bool(matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
        }
    }

    /// Convert to the declared type when a layer supplied a different shape
    pub fn coerce(self, input_type: InputType) -> Self {
        match (self, input_type) {
            (v @ InputValue::Text(_), InputType::String)
            | (v @ InputValue::List(_), InputType::List)
            | (v @ InputValue::Bool(_), InputType::Bool) => v,
            (InputValue::Text(s), ty) => InputValue::parse(&s, ty),
            (InputValue::List(items), InputType::String) => InputValue::Text(items.join(",")),
            (InputValue::List(items), InputType::Bool) => InputValue::Bool(!items.is_empty()),
            (InputValue::Bool(b), InputType::String) => InputValue::Text(b.to_string()),
            (InputValue::Bool(b), InputType::List) => InputValue::List(vec![b.to_string()]),
        }
    }

    /// True for the zero value of any type
    pub fn is_empty(&self) -> bool {
        match self {
            InputValue::Text(s) => s.trim().is_empty(),
            InputValue::List(items) => items.is_empty(),
            InputValue::Bool(b) => !b,
        }
    }

    /// Text rendering used to fill selector templates
    pub fn as_text(&self) -> String {
        match self {
            InputValue::Text(s) => s.clone(),
            InputValue::List(items) => items.join(","),
            InputValue::Bool(b) => b.to_string(),
        }
    }
}

/// Declaration of an input a control bundle consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(default, rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub default: Option<InputValue>,
    #[serde(default)]
    pub description: String,
}

impl InputDecl {
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_type: InputType::String,
            default: None,
            description: description.into(),
        }
    }

    pub fn with_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_default(mut self, value: InputValue) -> Self {
        self.default = Some(value);
        self
    }

    fn default_value(&self) -> InputValue {
        self.default
            .clone()
            .map(|v| v.coerce(self.input_type))
            .unwrap_or_else(|| InputValue::zero(self.input_type))
    }
}

/// Layered input resolver
#[derive(Debug, Clone, Default)]
pub struct InputResolver {
    declarations: BTreeMap<String, InputDecl>,
    profile: BTreeMap<String, InputValue>,
    overrides: BTreeMap<String, String>,
}

impl InputResolver {
    pub fn new<I>(declarations: I) -> Self
    where
        I: IntoIterator<Item = InputDecl>,
    {
        Self {
            declarations: declarations
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            profile: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Add the profile-level layer (the config file's `[inputs]` table)
    pub fn with_profile(mut self, profile: &BTreeMap<String, InputValue>) -> Self {
        for (name, value) in profile {
            if !self.declarations.contains_key(name) {
                warn!("Profile sets undeclared input '{}'", name);
            }
            self.profile.insert(name.clone(), value.clone());
        }
        self
    }

    /// Add overrides from `EKSAUDIT_INPUT_<NAME>` environment variables
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Add overrides from an arbitrary variable lookup
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let names: Vec<String> = self.declarations.keys().cloned().collect();
        for name in names {
            let key = format!("{}{}", INPUT_ENV_PREFIX, name.to_uppercase());
            if let Some(value) = lookup(&key) {
                debug!("Input '{}' overridden by {}", name, key);
                self.overrides.insert(name, value);
            }
        }
        self
    }

    /// Add overrides from `name=value` pairs (highest precedence)
    pub fn with_cli_overrides(mut self, pairs: &[String]) -> Result<Self> {
        for pair in pairs {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidInput(format!("expected name=value, got '{}'", pair)))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::InvalidInput(format!("empty input name in '{}'", pair)));
            }
            self.overrides.insert(name.to_string(), value.to_string());
        }
        Ok(self)
    }

    fn input_type(&self, name: &str) -> InputType {
        self.declarations
            .get(name)
            .map(|d| d.input_type)
            .unwrap_or_default()
    }

    /// Resolve one input; never fails
    pub fn resolve(&self, name: &str) -> InputValue {
        let ty = self.input_type(name);

        if let Some(raw) = self.overrides.get(name) {
            return InputValue::parse(raw, ty);
        }
        if let Some(value) = self.profile.get(name) {
            return value.clone().coerce(ty);
        }
        match self.declarations.get(name) {
            Some(decl) => decl.default_value(),
            None => InputValue::zero(ty),
        }
    }

    /// Resolve every known input into an immutable snapshot
    pub fn snapshot(&self) -> Inputs {
        let names = self
            .declarations
            .keys()
            .chain(self.profile.keys())
            .chain(self.overrides.keys());

        let values = names
            .map(|name| (name.clone(), self.resolve(name)))
            .collect();

        Inputs { values }
    }
}

/// Resolved inputs for one run; passed explicitly to every control
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    values: BTreeMap<String, InputValue>,
}

impl Inputs {
    /// Build a snapshot directly from string values
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), InputValue::Text(v.into())))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.get(name)
    }

    /// Text value of an input; empty when unset or unknown
    pub fn text(&self, name: &str) -> String {
        self.values
            .get(name)
            .map(|v| v.as_text())
            .unwrap_or_default()
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declarations() -> Vec<InputDecl> {
        vec![
            InputDecl::string("kubeconfig", "kubelet kubeconfig path"),
            InputDecl::string("node_name", "node to query"),
            InputDecl::string("proxy_port", "kubectl proxy port")
                .with_default(InputValue::Text("8001".into())),
            InputDecl::string("admins", "").with_type(InputType::List),
        ]
    }

    #[test]
    fn test_default_and_zero_values() {
        let resolver = InputResolver::new(declarations());

        assert_eq!(resolver.resolve("kubeconfig"), InputValue::Text(String::new()));
        assert_eq!(resolver.resolve("proxy_port"), InputValue::Text("8001".into()));
        assert_eq!(resolver.resolve("admins"), InputValue::List(vec![]));
        assert_eq!(resolver.resolve("never_declared"), InputValue::Text(String::new()));
    }

    #[test]
    fn test_layer_precedence() {
        let mut profile = BTreeMap::new();
        profile.insert("kubeconfig".to_string(), InputValue::Text("/profile".into()));
        profile.insert("node_name".to_string(), InputValue::Text("node-a".into()));
        profile.insert("proxy_port".to_string(), InputValue::Text("9000".into()));

        let resolver = InputResolver::new(declarations())
            .with_profile(&profile)
            .with_env_from(|key| match key {
                "EKSAUDIT_INPUT_KUBECONFIG" => Some("/env".into()),
                "EKSAUDIT_INPUT_NODE_NAME" => Some("node-env".into()),
                _ => None,
            })
            .with_cli_overrides(&["node_name=node-cli".to_string()])
            .unwrap();

        assert_eq!(resolver.resolve("kubeconfig"), InputValue::Text("/env".into()));
        assert_eq!(resolver.resolve("node_name"), InputValue::Text("node-cli".into()));
        assert_eq!(resolver.resolve("proxy_port"), InputValue::Text("9000".into()));
    }

    #[test]
    fn test_typed_coercion() {
        let resolver = InputResolver::new(declarations())
            .with_cli_overrides(&["admins=root, ops ,".to_string()])
            .unwrap();

        assert_eq!(
            resolver.resolve("admins"),
            InputValue::List(vec!["root".into(), "ops".into()])
        );
        assert_eq!(InputValue::parse("yes", InputType::Bool), InputValue::Bool(true));
        assert_eq!(
            InputValue::List(vec!["a".into(), "b".into()]).coerce(InputType::String),
            InputValue::Text("a,b".into())
        );
    }

    #[test]
    fn test_bad_cli_pair() {
        let err = InputResolver::new(declarations())
            .with_cli_overrides(&["kubeconfig".to_string()])
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_snapshot() {
        let inputs = InputResolver::new(declarations())
            .with_cli_overrides(&["kubeconfig=/var/lib/kubelet/kubeconfig".to_string()])
            .unwrap()
            .snapshot();

        assert!(inputs.is_set("kubeconfig"));
        assert!(!inputs.is_set("node_name"));
        assert!(inputs.is_set("proxy_port"));
        assert_eq!(inputs.text("kubeconfig"), "/var/lib/kubelet/kubeconfig");
        assert_eq!(inputs.text("unknown"), "");
    }
}
