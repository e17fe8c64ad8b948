//! Assertion types - typed predicates over a single fact

use serde::{Deserialize, Serialize};

/// Which part of a fact an assertion looks at
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subject {
    /// The fact as a whole (structured value, existence, mode, service state)
    #[default]
    Value,
    /// Owner name of an ownership fact
    Owner,
    /// Group name of an ownership fact
    Group,
    /// Permission bits of a mode fact
    Mode,
    /// One flag of a service-arguments fact
    Flag(String),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Value => write!(f, "value"),
            Subject::Owner => write!(f, "owner"),
            Subject::Group => write!(f, "group"),
            Subject::Mode => write!(f, "mode"),
            Subject::Flag(name) => write!(f, "flag {}", name),
        }
    }
}

/// How values are normalised before an equality comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalize {
    /// Trim surrounding whitespace, compare case-sensitively
    #[default]
    Exact,
    /// Trim surrounding whitespace, compare case-insensitively
    CaseInsensitive,
    /// Parse Go-style durations (`4h0m0s`, `0s`) and compare their length
    Duration,
}

/// The comparison applied to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Predicate {
    Equals {
        expected: String,
        #[serde(default)]
        normalize: Normalize,
    },
    NotEquals {
        expected: String,
        #[serde(default)]
        normalize: Normalize,
    },
    /// Octal ceiling, e.g. `0o644`; no permission bit outside the ceiling may be set
    NoMorePermissiveThan {
        #[serde(with = "octal_mode")]
        ceiling: u32,
    },
    MemberOf { set: Vec<String> },
    Exists,
    NotExists,
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Equals { expected, .. } => write!(f, "should equal '{}'", expected),
            Predicate::NotEquals { expected, .. } => write!(f, "should not equal '{}'", expected),
            Predicate::NoMorePermissiveThan { ceiling } => {
                write!(f, "should not be more permissive than {:04o}", ceiling)
            }
            Predicate::MemberOf { set } => write!(f, "should be one of [{}]", set.join(", ")),
            Predicate::Exists => write!(f, "should exist"),
            Predicate::NotExists => write!(f, "should not exist"),
        }
    }
}

/// A predicate applied to one subject of one fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(default)]
    pub subject: Subject,
    pub predicate: Predicate,
}

impl Assertion {
    pub fn new(subject: Subject, predicate: Predicate) -> Self {
        Self { subject, predicate }
    }

    pub fn equals(subject: Subject, expected: impl Into<String>) -> Self {
        Self::new(
            subject,
            Predicate::Equals {
                expected: expected.into(),
                normalize: Normalize::Exact,
            },
        )
    }

    pub fn not_equals(subject: Subject, expected: impl Into<String>) -> Self {
        Self::new(
            subject,
            Predicate::NotEquals {
                expected: expected.into(),
                normalize: Normalize::Exact,
            },
        )
    }

    pub fn no_more_permissive_than(ceiling: u32) -> Self {
        Self::new(Subject::Mode, Predicate::NoMorePermissiveThan { ceiling })
    }

    pub fn member_of<I, S>(subject: Subject, set: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            subject,
            Predicate::MemberOf {
                set: set.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn exists(subject: Subject) -> Self {
        Self::new(subject, Predicate::Exists)
    }

    pub fn not_exists(subject: Subject) -> Self {
        Self::new(subject, Predicate::NotExists)
    }

    /// Switch an equality predicate to a different normalisation
    pub fn normalized(mut self, mode: Normalize) -> Self {
        match &mut self.predicate {
            Predicate::Equals { normalize, .. } | Predicate::NotEquals { normalize, .. } => {
                *normalize = mode;
            }
            _ => {}
        }
        self
    }
}

impl std::fmt::Display for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.subject, self.predicate)
    }
}

/// Permission modes written as octal strings (`"0644"`) or plain integers
mod octal_mode {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(mode) => Ok(mode),
            Raw::Text(text) => {
                let digits = text.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| de::Error::custom(format!("invalid octal mode '{}'", text)))
            }
        }
    }
}
