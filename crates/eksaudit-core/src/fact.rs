//! Facts: values observed on the target system, and the selectors that name them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Which adapter family serves a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Filesystem,
    Service,
    StructuredConfig,
    Http,
}

/// Names one fact to read from the target
///
/// String fields may contain `{input_name}` placeholders that are filled from
/// the resolved inputs before the selector reaches an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FactSelector {
    /// Owner and group names of a file
    FileOwnership { path: String },
    /// Permission bits of a file
    FileMode { path: String },
    /// Whether a file exists
    FileExists { path: String },
    /// Whether a service is running
    ServiceRunning { service: String },
    /// Parsed `--flag=value` arguments of a service's start command
    ServiceArgs { service: String },
    /// A value inside a JSON or YAML file
    ConfigValue {
        path: String,
        #[serde(default)]
        key: Vec<String>,
    },
    /// A value inside a JSON document fetched over HTTP
    HttpJson {
        url: String,
        #[serde(default)]
        key: Vec<String>,
    },
}

impl FactSelector {
    /// Adapter family that serves this selector
    pub fn source_kind(&self) -> SourceKind {
        match self {
            FactSelector::FileOwnership { .. }
            | FactSelector::FileMode { .. }
            | FactSelector::FileExists { .. } => SourceKind::Filesystem,
            FactSelector::ServiceRunning { .. } | FactSelector::ServiceArgs { .. } => {
                SourceKind::Service
            }
            FactSelector::ConfigValue { .. } => SourceKind::StructuredConfig,
            FactSelector::HttpJson { .. } => SourceKind::Http,
        }
    }

    /// Fill `{name}` placeholders using `lookup`
    ///
    /// Returns the name of the first placeholder whose value is missing or empty.
    pub fn render<F>(&self, lookup: F) -> std::result::Result<FactSelector, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = |s: &String| render_template(s, &lookup);
        Ok(match self {
            FactSelector::FileOwnership { path } => FactSelector::FileOwnership { path: r(path)? },
            FactSelector::FileMode { path } => FactSelector::FileMode { path: r(path)? },
            FactSelector::FileExists { path } => FactSelector::FileExists { path: r(path)? },
            FactSelector::ServiceRunning { service } => FactSelector::ServiceRunning {
                service: r(service)?,
            },
            FactSelector::ServiceArgs { service } => FactSelector::ServiceArgs {
                service: r(service)?,
            },
            FactSelector::ConfigValue { path, key } => FactSelector::ConfigValue {
                path: r(path)?,
                key: key.iter().map(r).collect::<std::result::Result<_, _>>()?,
            },
            FactSelector::HttpJson { url, key } => FactSelector::HttpJson {
                url: render_url(url, &lookup)?,
                key: key.iter().map(r).collect::<std::result::Result<_, _>>()?,
            },
        })
    }

    /// Short human-readable description used in explanations
    pub fn describe(&self) -> String {
        match self {
            FactSelector::FileOwnership { path } => format!("ownership of {}", path),
            FactSelector::FileMode { path } => format!("mode of {}", path),
            FactSelector::FileExists { path } => format!("existence of {}", path),
            FactSelector::ServiceRunning { service } => format!("state of service {}", service),
            FactSelector::ServiceArgs { service } => format!("arguments of service {}", service),
            FactSelector::ConfigValue { path, key } => {
                format!("{} in {}", key_display(key), path)
            }
            FactSelector::HttpJson { url, key } => format!("{} at {}", key_display(key), url),
        }
    }
}

fn key_display(key: &[String]) -> String {
    if key.is_empty() {
        String::from("document")
    } else {
        format!("[{}]", key.join("."))
    }
}

/// Replace every `{name}` in `template` with `lookup(name)`
fn render_template<F>(template: &str, lookup: &F) -> std::result::Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = after[..end].trim();
        match lookup(name) {
            Some(value) if !value.is_empty() => out.push_str(&value),
            _ => return Err(name.to_string()),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Render a URL template, percent-encoding values that land in the path
///
/// Values in the scheme and authority (`{proxy_hostname}:{proxy_port}`)
/// are inserted verbatim. A template that is not an absolute URL is
/// rendered as plain text.
fn render_url<F>(template: &str, lookup: &F) -> std::result::Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let rendered = render_template(template, lookup)?;

    let Some(authority_start) = template.find("://").map(|i| i + 3) else {
        return Ok(rendered);
    };
    let Some(path_start) = template[authority_start..]
        .find('/')
        .map(|i| i + authority_start)
    else {
        return Ok(rendered);
    };

    let (path, query) = match template[path_start..].split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (&template[path_start..], None),
    };

    let Ok(mut url) = Url::parse(&render_template(&template[..path_start], lookup)?) else {
        return Ok(rendered);
    };
    {
        let Ok(mut segments) = url.path_segments_mut() else {
            return Ok(rendered);
        };
        segments.clear();
        for segment in path.trim_start_matches('/').split('/') {
            segments.push(&render_template(segment, lookup)?);
        }
    }
    if let Some(query) = query {
        url.set_query(Some(&render_template(query, lookup)?));
    }

    Ok(url.to_string())
}

/// Parsed command-line flags of a service (`--flag` -> value)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFlags(BTreeMap<String, String>);

impl ServiceFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag, replacing any earlier value
    pub fn insert(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        self.0.insert(flag.into(), value.into());
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.0.get(flag).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A value read from the target system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Fact {
    Ownership { owner: String, group: String },
    Mode(u32),
    Existence(bool),
    ServiceState { running: bool },
    ServiceArgs(ServiceFlags),
    /// Structured value; `Null` when the key path is absent
    Value(serde_json::Value),
}

impl Fact {
    /// Compact rendering for explanations
    pub fn summary(&self) -> String {
        match self {
            Fact::Ownership { owner, group } => format!("{}:{}", owner, group),
            Fact::Mode(mode) => format!("{:04o}", mode),
            Fact::Existence(true) => String::from("exists"),
            Fact::Existence(false) => String::from("does not exist"),
            Fact::ServiceState { running: true } => String::from("running"),
            Fact::ServiceState { running: false } => String::from("not running"),
            Fact::ServiceArgs(flags) => format!("{} flags", flags.len()),
            Fact::Value(serde_json::Value::Null) => String::from("absent"),
            Fact::Value(v) => v.to_string(),
        }
    }
}

/// Category of a fact retrieval failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchErrorKind {
    NotFound,
    PermissionDenied,
    MalformedContent,
    NetworkUnreachable,
    Timeout,
}

/// Failure to read a fact from the target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::PermissionDenied(_) => FetchErrorKind::PermissionDenied,
            FetchError::MalformedContent(_) => FetchErrorKind::MalformedContent,
            FetchError::NetworkUnreachable(_) => FetchErrorKind::NetworkUnreachable,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
        }
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self.kind() {
            FetchErrorKind::NotFound => "NOT_FOUND",
            FetchErrorKind::PermissionDenied => "PERMISSION_DENIED",
            FetchErrorKind::MalformedContent => "MALFORMED_CONTENT",
            FetchErrorKind::NetworkUnreachable => "NETWORK_UNREACHABLE",
            FetchErrorKind::Timeout => "TIMEOUT",
        }
    }

    /// Map an I/O error on `what` to a fetch error
    pub fn from_io(what: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let message = format!("{}: {}", what, err);
        match err.kind() {
            ErrorKind::NotFound => FetchError::NotFound(message),
            ErrorKind::PermissionDenied => FetchError::PermissionDenied(message),
            ErrorKind::TimedOut => FetchError::Timeout(message),
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                FetchError::MalformedContent(message)
            }
            _ => FetchError::NotFound(message),
        }
    }
}
