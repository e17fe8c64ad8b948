//! Control executor - runs one control through its state machine
//!
//! ```text
//! pending -> resolving-inputs -> fetching-facts -> evaluating -> {passed, failed, skipped, errored}
//! ```
//!
//! Unmet preconditions short-circuit to `skipped` before any fact is read.
//! The executor is the only place where fetch errors become outcomes.

use crate::evaluator::evaluate;
use eksaudit_common::Inputs;
use eksaudit_core::{
    CheckPlan, CheckProcedure, CompositeMode, Control, ControlRecord, Fact, FactSelector,
    FetchError, Outcome, Precondition, Probe, Strategy,
};
use eksaudit_facts::FactSource;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Non-terminal states of a control run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    ResolvingInputs,
    FetchingFacts,
    Evaluating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::ResolvingInputs => "resolving-inputs",
            Phase::FetchingFacts => "fetching-facts",
            Phase::Evaluating => "evaluating",
        };
        f.write_str(name)
    }
}

/// Why a gate did not open
enum Gate {
    Open,
    Closed(String),
    Failed(String),
}

/// A probe whose selector has been rendered against the inputs
struct ReadyProbe<'a> {
    probe: &'a Probe,
    selector: FactSelector,
}

/// Result of scoring one probe
enum Score {
    Pass(String),
    Fail(String),
    /// Fetch or evaluation failure; `fatal` when the probe was not optional
    Error { message: String, fatal: bool },
}

/// Facts read during one control run, so a selector used twice is read once
#[derive(Default)]
struct FactCache {
    entries: Vec<(FactSelector, Result<Fact, FetchError>)>,
}

impl FactCache {
    fn get(&self, selector: &FactSelector) -> Option<&Result<Fact, FetchError>> {
        self.entries
            .iter()
            .find(|(s, _)| s == selector)
            .map(|(_, fact)| fact)
    }
}

/// Runs individual controls against a fact source
#[derive(Clone)]
pub struct ControlExecutor {
    source: Arc<dyn FactSource>,
}

impl ControlExecutor {
    pub fn new(source: Arc<dyn FactSource>) -> Self {
        Self { source }
    }

    /// Run one control; always yields exactly one terminal record
    pub async fn execute(&self, control: &Control, inputs: &Inputs) -> ControlRecord {
        let started = Instant::now();
        debug!("{}: {}", control.id, Phase::Pending);

        let record = match &control.check {
            CheckProcedure::Manual => ControlRecord::skipped(control, "manual review required"),
            CheckProcedure::Automated(plan) => self.run_plan(control, plan, inputs).await,
        };

        match record.outcome {
            Outcome::Failed | Outcome::Errored => {
                warn!("{} {}: {}", control.id, record.outcome, record.explanation)
            }
            _ => info!("{} {}: {}", control.id, record.outcome, record.explanation),
        }

        record.with_duration_ms(started.elapsed().as_millis() as u64)
    }

    async fn run_plan(&self, control: &Control, plan: &CheckPlan, inputs: &Inputs) -> ControlRecord {
        debug!("{}: {}", control.id, Phase::ResolvingInputs);

        match self.check_gates(&plan.preconditions, inputs).await {
            Gate::Open => {}
            Gate::Closed(reason) => return ControlRecord::skipped(control, &reason),
            Gate::Failed(reason) => return ControlRecord::errored(control, &reason),
        }

        let mut unmet = Vec::new();
        let mut chosen = None;
        for strategy in &plan.strategies {
            match self.prepare(strategy, inputs).await {
                Ok(ready) => {
                    chosen = Some((strategy, ready));
                    break;
                }
                Err(Gate::Closed(reason)) => {
                    debug!("{}: strategy '{}' not applicable: {}", control.id, strategy.name, reason);
                    unmet.push(format!("{}: {}", strategy.name, reason));
                }
                Err(Gate::Failed(reason)) => return ControlRecord::errored(control, &reason),
                Err(Gate::Open) => {}
            }
        }

        let Some((strategy, probes)) = chosen else {
            let reason = if unmet.is_empty() {
                String::from("no check strategy declared")
            } else {
                format!("no applicable check strategy ({})", unmet.join("; "))
            };
            return ControlRecord::skipped(control, &reason);
        };

        self.run_strategy(control, strategy, probes).await
    }

    /// Check gates in two passes: inputs first, services second
    ///
    /// Input gates need no I/O, so an unset input skips the control without
    /// touching any adapter.
    async fn check_gates(&self, gates: &[Precondition], inputs: &Inputs) -> Gate {
        for gate in gates {
            if let Precondition::InputSet(name) = gate {
                if !inputs.is_set(name) {
                    return Gate::Closed(format!("input '{}' is not set", name));
                }
            }
        }

        for gate in gates {
            if let Precondition::ServiceRunning(service) = gate {
                let selector = FactSelector::ServiceRunning {
                    service: service.clone(),
                };
                match self.source.fetch(&selector).await {
                    Ok(Fact::ServiceState { running: true }) => {}
                    Ok(Fact::ServiceState { running: false }) => {
                        return Gate::Closed(format!("service {} is not running", service))
                    }
                    Ok(other) => {
                        return Gate::Failed(format!(
                            "unexpected {} for state of service {}",
                            other.summary(),
                            service
                        ))
                    }
                    Err(e) => {
                        return Gate::Failed(format!(
                            "could not determine state of service {}: {}",
                            service, e
                        ))
                    }
                }
            }
        }

        Gate::Open
    }

    /// Check a strategy's requirements and render its selectors
    async fn prepare<'a>(
        &self,
        strategy: &'a Strategy,
        inputs: &Inputs,
    ) -> Result<Vec<ReadyProbe<'a>>, Gate> {
        let lookup = |name: &str| inputs.get(name).map(|v| v.as_text());

        // render first: an unset placeholder closes the strategy without I/O
        let mut ready = Vec::with_capacity(strategy.probes.len());
        for probe in &strategy.probes {
            match probe.selector.render(lookup) {
                Ok(selector) => ready.push(ReadyProbe { probe, selector }),
                Err(name) => return Err(Gate::Closed(format!("input '{}' is not set", name))),
            }
        }

        match self.check_gates(&strategy.requires, inputs).await {
            Gate::Open => Ok(ready),
            closed => Err(closed),
        }
    }

    async fn run_strategy(
        &self,
        control: &Control,
        strategy: &Strategy,
        probes: Vec<ReadyProbe<'_>>,
    ) -> ControlRecord {
        debug!(
            "{}: {} via '{}' ({} probes)",
            control.id,
            Phase::FetchingFacts,
            strategy.name,
            probes.len()
        );

        let mut cache = FactCache::default();
        let mut scores = Vec::with_capacity(probes.len());

        for ready in &probes {
            let score = self.score(control, ready, &mut cache).await;

            match (&score, strategy.mode) {
                (Score::Error { message, fatal: true }, CompositeMode::All) => {
                    return ControlRecord::errored(control, message);
                }
                (Score::Pass(_), CompositeMode::AnyOf) => {
                    scores.push(score);
                    break;
                }
                _ => scores.push(score),
            }
        }

        debug!("{}: {}", control.id, Phase::Evaluating);
        combine(control, strategy.mode, scores)
    }

    async fn score(&self, control: &Control, ready: &ReadyProbe<'_>, cache: &mut FactCache) -> Score {
        let cached = cache.get(&ready.selector).cloned();
        let fact = match cached {
            Some(cached) => cached,
            None => {
                let fetched = self.source.fetch(&ready.selector).await;
                cache.entries.push((ready.selector.clone(), fetched.clone()));
                fetched
            }
        };

        let fact = match fact {
            Ok(fact) => fact,
            Err(e) => {
                debug!("{}: fetch failed for {}: {}", control.id, ready.selector.describe(), e);
                return Score::Error {
                    message: format!("could not read {}: {}", ready.selector.describe(), e),
                    fatal: !ready.probe.optional,
                };
            }
        };

        let target = ready.selector.describe();
        match evaluate(&ready.probe.assertion, &fact) {
            Ok(verdict) if verdict.passed => Score::Pass(format!("{}: {}", target, verdict.explanation)),
            Ok(verdict) => Score::Fail(format!("{}: {}", target, verdict.explanation)),
            Err(e) => Score::Error {
                message: format!("cannot evaluate {}: {}", target, e),
                fatal: true,
            },
        }
    }
}

/// Fold probe scores into a terminal record
fn combine(control: &Control, mode: CompositeMode, scores: Vec<Score>) -> ControlRecord {
    let mut passes = Vec::new();
    let mut failures = Vec::new();
    let mut errors = Vec::new();
    let mut fatal = false;

    for score in scores {
        match score {
            Score::Pass(text) => passes.push(text),
            Score::Fail(text) => failures.push(text),
            Score::Error { message, fatal: f } => {
                fatal |= f;
                errors.push(message);
            }
        }
    }

    match mode {
        CompositeMode::All => {
            if failures.is_empty() && errors.is_empty() {
                ControlRecord::passed(control, &passes.join("; "))
            } else {
                // optional probe errors count as failed assertions here
                failures.extend(errors);
                ControlRecord::failed(control, &failures.join("; "))
            }
        }
        CompositeMode::AnyOf => {
            if let Some(pass) = passes.pop() {
                ControlRecord::passed(control, &pass)
            } else if failures.is_empty() && fatal {
                // nothing could be evaluated at all
                ControlRecord::errored(control, &errors.join("; "))
            } else {
                failures.extend(errors);
                ControlRecord::failed(
                    control,
                    &format!("no alternative passed: {}", failures.join("; ")),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eksaudit_core::{
        Assertion, ComplianceTags, Normalize, ServiceFlags, Subject,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fact source serving canned facts and counting calls per kind
    #[derive(Default)]
    struct MockSource {
        kubelet_running: bool,
        ownership: Option<(String, String)>,
        mode: Option<u32>,
        file_exists: bool,
        flags: Vec<(String, String)>,
        config: Option<Value>,
        http: Option<Value>,
        service_calls: AtomicUsize,
        fact_calls: AtomicUsize,
    }

    impl MockSource {
        fn fact_calls(&self) -> usize {
            self.fact_calls.load(Ordering::SeqCst)
        }
        fn service_calls(&self) -> usize {
            self.service_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FactSource for MockSource {
        async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
            let missing = |what: &str| FetchError::NotFound(what.to_string());

            if let FactSelector::ServiceRunning { .. } = selector {
                self.service_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(Fact::ServiceState {
                    running: self.kubelet_running,
                });
            }

            self.fact_calls.fetch_add(1, Ordering::SeqCst);
            match selector {
                FactSelector::FileOwnership { path } => self
                    .ownership
                    .clone()
                    .map(|(owner, group)| Fact::Ownership { owner, group })
                    .ok_or_else(|| missing(path)),
                FactSelector::FileMode { path } => self.mode.map(Fact::Mode).ok_or_else(|| missing(path)),
                FactSelector::FileExists { .. } => Ok(Fact::Existence(self.file_exists)),
                FactSelector::ServiceArgs { .. } => {
                    let mut flags = ServiceFlags::new();
                    for (k, v) in &self.flags {
                        flags.insert(k.clone(), v.clone());
                    }
                    Ok(Fact::ServiceArgs(flags))
                }
                FactSelector::ConfigValue { path, key } => self
                    .config
                    .as_ref()
                    .map(|doc| Fact::Value(eksaudit_facts::lookup_key_path(doc, key)))
                    .ok_or_else(|| missing(path)),
                FactSelector::HttpJson { url, key } => self
                    .http
                    .as_ref()
                    .map(|doc| Fact::Value(eksaudit_facts::lookup_key_path(doc, key)))
                    .ok_or_else(|| FetchError::NetworkUnreachable(url.clone())),
                FactSelector::ServiceRunning { .. } => Err(missing("unreachable")),
            }
        }
    }

    fn root_owned_control() -> Control {
        let selector = FactSelector::FileOwnership {
            path: "{kubeconfig}".into(),
        };
        Control::new("eks-cis-3.1.2", "kubeconfig ownership", 0.5)
            .with_tags(ComplianceTags::new().with("nist", ["CM-6"]))
            .with_plan(
                CheckPlan::new()
                    .precondition(Precondition::ServiceRunning("kubelet".into()))
                    .precondition(Precondition::InputSet("kubeconfig".into()))
                    .strategy(Strategy::new("local", CompositeMode::All).with_probes(vec![
                        Probe::new(selector.clone(), Assertion::equals(Subject::Owner, "root")),
                        Probe::new(selector, Assertion::equals(Subject::Group, "root")),
                    ])),
            )
    }

    fn kubeconfig_inputs() -> Inputs {
        Inputs::from_pairs([("kubeconfig", "/var/lib/kubelet/kubeconfig")])
    }

    fn owned_by(owner: &str) -> Option<(String, String)> {
        Some((owner.to_string(), owner.to_string()))
    }

    #[tokio::test]
    async fn test_root_ownership_passes() {
        let source = Arc::new(MockSource {
            kubelet_running: true,
            ownership: owned_by("root"),
            ..Default::default()
        });
        let executor = ControlExecutor::new(source.clone());

        let record = executor.execute(&root_owned_control(), &kubeconfig_inputs()).await;
        assert_eq!(record.outcome, Outcome::Passed);
        assert!(record.explanation.contains("/var/lib/kubelet/kubeconfig"));
        // both probes share one read
        assert_eq!(source.fact_calls(), 1);
        assert_eq!(record.tags.sections("nist"), ["CM-6"]);
    }

    #[tokio::test]
    async fn test_wrong_owner_fails() {
        let source = Arc::new(MockSource {
            kubelet_running: true,
            ownership: owned_by("ec2-user"),
            ..Default::default()
        });
        let record = ControlExecutor::new(source)
            .execute(&root_owned_control(), &kubeconfig_inputs())
            .await;
        assert_eq!(record.outcome, Outcome::Failed);
        assert!(record.explanation.contains("ec2-user"));
    }

    #[tokio::test]
    async fn test_service_not_running_skips_without_fetching() {
        let source = Arc::new(MockSource {
            kubelet_running: false,
            ownership: owned_by("root"),
            ..Default::default()
        });
        let record = ControlExecutor::new(source.clone())
            .execute(&root_owned_control(), &kubeconfig_inputs())
            .await;

        assert_eq!(record.outcome, Outcome::Skipped);
        assert!(record.explanation.contains("kubelet is not running"));
        assert_eq!(source.fact_calls(), 0);
    }

    #[tokio::test]
    async fn test_unset_input_skips_without_any_adapter_call() {
        let source = Arc::new(MockSource {
            kubelet_running: true,
            ownership: owned_by("root"),
            ..Default::default()
        });
        let record = ControlExecutor::new(source.clone())
            .execute(&root_owned_control(), &Inputs::from_pairs([("kubeconfig", "")]))
            .await;

        assert_eq!(record.outcome, Outcome::Skipped);
        assert!(record.explanation.contains("kubeconfig"));
        assert_eq!(source.fact_calls(), 0);
        assert_eq!(source.service_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_is_errored_not_failed() {
        let source = Arc::new(MockSource {
            kubelet_running: true,
            ownership: None,
            ..Default::default()
        });
        let record = ControlExecutor::new(source)
            .execute(&root_owned_control(), &kubeconfig_inputs())
            .await;
        assert_eq!(record.outcome, Outcome::Errored);
        assert!(record.explanation.contains("not found"));
    }

    #[tokio::test]
    async fn test_any_of_missing_file_then_flag_passes() {
        let control = Control::new("eks-cis-3.2.5", "idle timeout", 0.5).with_plan(CheckPlan::single(
            CompositeMode::AnyOf,
            vec![
                Probe::new(
                    FactSelector::ConfigValue {
                        path: "/etc/kubernetes/kubelet/kubelet-config.json".into(),
                        key: vec!["streamingConnectionIdleTimeout".into()],
                    },
                    Assertion::not_equals(Subject::Value, "0s").normalized(Normalize::Duration),
                ),
                Probe::new(
                    FactSelector::ServiceArgs {
                        service: "kubelet".into(),
                    },
                    Assertion::not_equals(
                        Subject::Flag("--streaming-connection-idle-timeout".into()),
                        "0s",
                    )
                    .normalized(Normalize::Duration),
                ),
            ],
        ));

        let source = Arc::new(MockSource {
            config: None,
            flags: vec![("--streaming-connection-idle-timeout".into(), "5m".into())],
            ..Default::default()
        });
        let record = ControlExecutor::new(source).execute(&control, &Inputs::default()).await;
        assert_eq!(record.outcome, Outcome::Passed);
        assert!(record.explanation.contains("5m"));
    }

    #[tokio::test]
    async fn test_any_of_all_failing() {
        let control = Control::new("eks-cis-3.1.3", "config perms", 0.5).with_plan(CheckPlan::single(
            CompositeMode::AnyOf,
            vec![
                Probe::new(
                    FactSelector::FileExists {
                        path: "/etc/kubelet.json".into(),
                    },
                    Assertion::not_exists(Subject::Value),
                ),
                Probe::new(
                    FactSelector::FileMode {
                        path: "/etc/kubelet.json".into(),
                    },
                    Assertion::no_more_permissive_than(0o644),
                )
                .optional(),
            ],
        ));

        let source = Arc::new(MockSource {
            file_exists: true,
            mode: Some(0o666),
            ..Default::default()
        });
        let record = ControlExecutor::new(source).execute(&control, &Inputs::default()).await;
        assert_eq!(record.outcome, Outcome::Failed);
        assert!(record.explanation.starts_with("no alternative passed"));
    }

    #[tokio::test]
    async fn test_fallback_uses_first_applicable_strategy_only() {
        let zero = || Assertion::equals(Subject::Value, "0");
        let control = Control::new("eks-cis-3.2.4", "read-only port", 0.5).with_plan(
            CheckPlan::new()
                .strategy(
                    Strategy::new("config-file", CompositeMode::All)
                        .requires(Precondition::InputSet("kubelet_config".into()))
                        .probe(Probe::new(
                            FactSelector::ConfigValue {
                                path: "{kubelet_config}".into(),
                                key: vec!["readOnlyPort".into()],
                            },
                            zero(),
                        )),
                )
                .strategy(
                    Strategy::new("configz-api", CompositeMode::All).probe(Probe::new(
                        FactSelector::HttpJson {
                            url: "http://{proxy_hostname}:{proxy_port}/api/v1/nodes/{node_name}/proxy/configz".into(),
                            key: vec!["kubeletconfig".into(), "readOnlyPort".into()],
                        },
                        zero(),
                    )),
                ),
        );

        let source = Arc::new(MockSource {
            config: Some(serde_json::json!({"readOnlyPort": 10255})),
            http: Some(serde_json::json!({"kubeletconfig": {"readOnlyPort": 0}})),
            ..Default::default()
        });
        let executor = ControlExecutor::new(source.clone());

        let config_inputs = Inputs::from_pairs([
            ("kubelet_config", "/etc/kubernetes/kubelet/kubelet-config.json"),
            ("node_name", "node-1"),
            ("proxy_hostname", "localhost"),
            ("proxy_port", "8001"),
        ]);
        let record = executor.execute(&control, &config_inputs).await;
        assert_eq!(record.outcome, Outcome::Failed);
        assert_eq!(source.fact_calls(), 1);

        let api_inputs = Inputs::from_pairs([
            ("node_name", "node-1"),
            ("proxy_hostname", "localhost"),
            ("proxy_port", "8001"),
        ]);
        let record = executor.execute(&control, &api_inputs).await;
        assert_eq!(record.outcome, Outcome::Passed);

        let record = executor.execute(&control, &Inputs::default()).await;
        assert_eq!(record.outcome, Outcome::Skipped);
        assert!(record.explanation.contains("no applicable check strategy"));
    }

    #[tokio::test]
    async fn test_manual_control_skipped() {
        let source = Arc::new(MockSource::default());
        let control = Control::new("eks-cis-4.1.4", "Minimize access to create pods", 0.5);

        let record = ControlExecutor::new(source.clone()).execute(&control, &Inputs::default()).await;
        assert_eq!(record.outcome, Outcome::Skipped);
        assert_eq!(record.explanation, "manual review required");
        assert_eq!(source.fact_calls() + source.service_calls(), 0);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_stable() {
        let source = Arc::new(MockSource {
            kubelet_running: true,
            ownership: owned_by("ec2-user"),
            ..Default::default()
        });
        let executor = ControlExecutor::new(source);
        let control = root_owned_control();

        let first = executor.execute(&control, &kubeconfig_inputs()).await;
        let second = executor.execute(&control, &kubeconfig_inputs()).await;
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.explanation, second.explanation);
    }
}
