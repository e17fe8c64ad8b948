//! Assertion evaluator - scores one fact against one assertion

use crate::duration::parse_duration;
use eksaudit_core::{Assertion, Fact, Normalize, Predicate, Subject};
use serde_json::Value;
use thiserror::Error;

/// Result of a successful evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub explanation: String,
}

impl Verdict {
    fn pass(explanation: String) -> Self {
        Self {
            passed: true,
            explanation,
        }
    }

    fn fail(explanation: String) -> Self {
        Self {
            passed: false,
            explanation,
        }
    }
}

/// The assertion cannot be applied to the fact it was given
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{subject} cannot be read from a {fact} fact")]
    SubjectMismatch { subject: String, fact: String },

    #[error("'{predicate}' cannot be applied to {observed}")]
    PredicateMismatch { predicate: String, observed: String },
}

/// What an assertion's subject resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Absent,
    Text(String),
    Mode(u32),
    Existence(bool),
}

impl std::fmt::Display for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observed::Absent => write!(f, "absent"),
            Observed::Text(s) => write!(f, "'{}'", s),
            Observed::Mode(m) => write!(f, "{:04o}", m),
            Observed::Existence(true) => write!(f, "present"),
            Observed::Existence(false) => write!(f, "missing"),
        }
    }
}

/// Evaluate `assertion` against `fact`
pub fn evaluate(assertion: &Assertion, fact: &Fact) -> Result<Verdict, EvalError> {
    let observed = observe(&assertion.subject, fact)?;
    let subject = &assertion.subject;

    let verdict = match &assertion.predicate {
        Predicate::Equals {
            expected,
            normalize,
        } => {
            let equal = matches(&observed, expected, *normalize);
            let text = format!("{} is {}, expected '{}'", subject, observed, expected);
            if equal {
                Verdict::pass(text)
            } else {
                Verdict::fail(text)
            }
        }
        Predicate::NotEquals {
            expected,
            normalize,
        } => {
            let equal = matches(&observed, expected, *normalize);
            let text = format!("{} is {}, must not be '{}'", subject, observed, expected);
            if equal {
                Verdict::fail(text)
            } else {
                Verdict::pass(text)
            }
        }
        Predicate::NoMorePermissiveThan { ceiling } => {
            let mode = match &observed {
                Observed::Mode(m) => *m,
                Observed::Text(t) => parse_octal(t).ok_or_else(|| EvalError::PredicateMismatch {
                    predicate: assertion.predicate.to_string(),
                    observed: observed.to_string(),
                })?,
                Observed::Absent => {
                    return Ok(Verdict::fail(format!("{} is absent", subject)));
                }
                Observed::Existence(_) => {
                    return Err(EvalError::PredicateMismatch {
                        predicate: assertion.predicate.to_string(),
                        observed: observed.to_string(),
                    })
                }
            };

            let excess = mode & !ceiling & 0o777;
            if excess == 0 {
                Verdict::pass(format!(
                    "{} {:04o} is no more permissive than {:04o}",
                    subject, mode, ceiling
                ))
            } else {
                Verdict::fail(format!(
                    "{} {:04o} is more permissive than {:04o} (extra bits {:04o})",
                    subject, mode, ceiling, excess
                ))
            }
        }
        Predicate::MemberOf { set } => {
            let member = match &observed {
                Observed::Text(t) => set.iter().any(|s| s == t),
                Observed::Mode(m) => set.iter().any(|s| parse_octal(s) == Some(*m)),
                Observed::Existence(b) => set.iter().any(|s| *s == b.to_string()),
                Observed::Absent => false,
            };
            let text = format!("{} is {}, allowed [{}]", subject, observed, set.join(", "));
            if member {
                Verdict::pass(text)
            } else {
                Verdict::fail(text)
            }
        }
        Predicate::Exists => {
            if present(&observed) {
                Verdict::pass(format!("{} exists", subject))
            } else {
                Verdict::fail(format!("{} does not exist", subject))
            }
        }
        Predicate::NotExists => {
            if present(&observed) {
                Verdict::fail(format!("{} exists", subject))
            } else {
                Verdict::pass(format!("{} does not exist", subject))
            }
        }
    };

    Ok(verdict)
}

fn observe(subject: &Subject, fact: &Fact) -> Result<Observed, EvalError> {
    let mismatch = || EvalError::SubjectMismatch {
        subject: subject.to_string(),
        fact: fact_kind(fact).to_string(),
    };

    Ok(match (subject, fact) {
        (Subject::Owner, Fact::Ownership { owner, .. }) => Observed::Text(owner.clone()),
        (Subject::Group, Fact::Ownership { group, .. }) => Observed::Text(group.clone()),
        (Subject::Mode | Subject::Value, Fact::Mode(mode)) => Observed::Mode(*mode),
        (Subject::Flag(name), Fact::ServiceArgs(flags)) => flags
            .get(name)
            .map(|v| Observed::Text(v.to_string()))
            .unwrap_or(Observed::Absent),
        (Subject::Value, Fact::Existence(exists)) => Observed::Existence(*exists),
        (Subject::Value, Fact::ServiceState { running }) => Observed::Text(running.to_string()),
        (Subject::Value, Fact::Ownership { owner, group }) => {
            Observed::Text(format!("{}:{}", owner, group))
        }
        (Subject::Value, Fact::Value(value)) => match value {
            Value::Null => Observed::Absent,
            Value::String(s) => Observed::Text(s.clone()),
            other => Observed::Text(other.to_string()),
        },
        _ => return Err(mismatch()),
    })
}

fn fact_kind(fact: &Fact) -> &'static str {
    match fact {
        Fact::Ownership { .. } => "file-ownership",
        Fact::Mode(_) => "file-mode",
        Fact::Existence(_) => "file-existence",
        Fact::ServiceState { .. } => "service-state",
        Fact::ServiceArgs(_) => "service-args",
        Fact::Value(_) => "structured-value",
    }
}

fn present(observed: &Observed) -> bool {
    match observed {
        Observed::Absent => false,
        Observed::Existence(exists) => *exists,
        Observed::Text(_) | Observed::Mode(_) => true,
    }
}

fn matches(observed: &Observed, expected: &str, normalize: Normalize) -> bool {
    match observed {
        Observed::Absent => false,
        Observed::Mode(mode) => parse_octal(expected) == Some(*mode),
        Observed::Existence(exists) => text_equal(&exists.to_string(), expected, Normalize::CaseInsensitive),
        Observed::Text(actual) => text_equal(actual, expected, normalize),
    }
}

fn text_equal(actual: &str, expected: &str, normalize: Normalize) -> bool {
    let (actual, expected) = (actual.trim(), expected.trim());
    match normalize {
        Normalize::Exact => actual == expected,
        Normalize::CaseInsensitive => actual.eq_ignore_ascii_case(expected),
        Normalize::Duration => match (parse_duration(actual), parse_duration(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => actual == expected,
        },
    }
}

fn parse_octal(text: &str) -> Option<u32> {
    let digits = text.trim().trim_start_matches("0o");
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok()
}
