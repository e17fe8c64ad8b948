//! Bounded concurrent runner

use crate::aggregator::{ResultAggregator, RunSummary};
use crate::cancel::CancelSignal;
use crate::executor::ControlExecutor;
use eksaudit_common::config::EngineConfig;
use eksaudit_common::Inputs;
use eksaudit_core::{Control, ControlRecord};
use eksaudit_facts::FactSource;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Runs many controls concurrently
///
/// Every control ends as exactly one record: its own outcome, or `errored`
/// when it timed out, was cancelled or panicked.
pub struct Engine {
    executor: ControlExecutor,
    max_concurrent: usize,
    control_timeout: Duration,
}

impl Engine {
    pub fn new(source: Arc<dyn FactSource>) -> Self {
        Self::from_config(source, &EngineConfig::default())
    }

    pub fn from_config(source: Arc<dyn FactSource>, config: &EngineConfig) -> Self {
        Self {
            executor: ControlExecutor::new(source),
            max_concurrent: config.max_concurrent_controls.max(1),
            control_timeout: Duration::from_secs(config.control_timeout_seconds),
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Run `controls` against one input snapshot
    pub async fn run(
        &self,
        controls: Vec<Arc<Control>>,
        inputs: Inputs,
        cancel: CancelSignal,
    ) -> RunSummary {
        info!(
            "Running {} controls ({} at a time, {:?} timeout each)",
            controls.len(),
            self.max_concurrent,
            self.control_timeout
        );

        let aggregator = Arc::new(ResultAggregator::new());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let inputs = Arc::new(inputs);
        let mut handles = Vec::with_capacity(controls.len());

        for control in controls {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let inputs = inputs.clone();
            let cancel = cancel.clone();
            let aggregator = aggregator.clone();
            let control_timeout = self.control_timeout;
            let task_control = control.clone();

            let handle = tokio::spawn(async move {
                let control = task_control;
                let started = Instant::now();

                let record = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ControlRecord::errored(&control, "cancelled"),
                    record = async {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return ControlRecord::errored(&control, "worker pool closed"),
                        };
                        match tokio::time::timeout(control_timeout, executor.execute(&control, &inputs)).await {
                            Ok(record) => record,
                            Err(_) => ControlRecord::errored(
                                &control,
                                &format!("timed out after {:?}", control_timeout),
                            ),
                        }
                    } => record,
                };

                let record = record.with_duration_ms(started.elapsed().as_millis() as u64);
                aggregator.record(record).await;
            });

            handles.push((control, handle));
        }

        let (spawned, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (control, joined) in spawned.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                error!("Control {} task failed: {}", control.id, e);
                let reason = if e.is_panic() {
                    "check panicked"
                } else {
                    "check task aborted"
                };
                aggregator.record(ControlRecord::errored(&control, reason)).await;
            }
        }

        let summary = aggregator.summary().await;
        info!(
            "Run complete: {} passed, {} failed, {} skipped, {} errored",
            summary.by_outcome.passed,
            summary.by_outcome.failed,
            summary.by_outcome.skipped,
            summary.by_outcome.errored
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eksaudit_core::{
        Assertion, CheckPlan, CompositeMode, Fact, FactSelector, FetchError, Outcome, Probe,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that sleeps per fetch and tracks peak concurrency
    struct SlowSource {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FactSource for SlowSource {
        async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            match selector {
                FactSelector::FileMode { path } if path.contains("panic") => {
                    panic!("adapter bug")
                }
                FactSelector::FileMode { .. } => Ok(Fact::Mode(0o600)),
                _ => Err(FetchError::NotFound("unsupported".into())),
            }
        }
    }

    fn mode_control(id: &str, path: &str) -> Arc<Control> {
        Arc::new(Control::new(id, id, 0.5).with_plan(CheckPlan::single(
            CompositeMode::All,
            vec![Probe::new(
                FactSelector::FileMode { path: path.into() },
                Assertion::no_more_permissive_than(0o644),
            )],
        )))
    }

    fn controls(n: usize) -> Vec<Arc<Control>> {
        (0..n)
            .map(|i| mode_control(&format!("ctl-{:03}", i), "/etc/kubernetes/kubelet.json"))
            .collect()
    }

    #[tokio::test]
    async fn test_n_controls_n_records() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(5)));
        let engine = Engine::new(source.clone()).with_concurrency(4);

        let summary = engine.run(controls(40), Inputs::default(), CancelSignal::new()).await;

        assert_eq!(summary.total, 40);
        assert_eq!(summary.count(Outcome::Passed), 40);
        let mut ids: Vec<_> = summary.records.iter().map(|r| r.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 40);
        assert!(source.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_timeout_is_errored() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(5)));
        let engine = Engine::new(source).with_control_timeout(Duration::from_millis(20));

        let summary = engine.run(controls(2), Inputs::default(), CancelSignal::new()).await;
        assert_eq!(summary.count(Outcome::Errored), 2);
        assert!(summary.records[0].explanation.starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_records_every_control() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(5)));
        let engine = Engine::new(source).with_concurrency(2);
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = engine.run(controls(6), Inputs::default(), cancel).await;
        assert_eq!(summary.total, 6);
        assert!(summary
            .records
            .iter()
            .all(|r| r.outcome == Outcome::Errored && r.explanation == "cancelled"));
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let engine = Engine::new(source);

        let mut set = controls(3);
        set.push(mode_control("ctl-panics", "/panic"));

        let summary = engine.run(set, Inputs::default(), CancelSignal::new()).await;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.count(Outcome::Passed), 3);

        let panicked = summary.record("ctl-panics").unwrap();
        assert_eq!(panicked.outcome, Outcome::Errored);
        assert_eq!(panicked.explanation, "check panicked");
    }

    #[tokio::test]
    async fn test_builtin_bundle_end_to_end() {
        use eksaudit_checks::ControlRegistry;
        use eksaudit_facts::{
            FileAdapter, HttpJsonAdapter, LocalFactSource, StructuredConfigAdapter, SystemdAdapter,
        };
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("kubelet-config.json");
        std::fs::write(&config, r#"{"readOnlyPort": 0, "streamingConnectionIdleTimeout": "4h0m0s"}"#).unwrap();
        std::fs::set_permissions(&config, std::fs::Permissions::from_mode(0o600)).unwrap();

        // `echo` stands in for systemctl and reports no running units
        let source = LocalFactSource::new(
            FileAdapter::default(),
            SystemdAdapter::new("echo", Duration::from_secs(5)),
            StructuredConfigAdapter::new(),
            HttpJsonAdapter::new(Duration::from_secs(5)).unwrap(),
        );
        let inputs = Inputs::from_pairs([("kubelet_config", config.to_str().unwrap())]);

        let registry = ControlRegistry::builtin();
        let summary = Engine::new(Arc::new(source))
            .run(registry.all(), inputs, CancelSignal::new())
            .await;

        assert_eq!(summary.total, registry.len());
        let outcome = |id: &str| summary.record(id).unwrap().outcome;
        assert_eq!(outcome("eks-cis-3.1.2"), Outcome::Skipped);
        assert_eq!(outcome("eks-cis-3.1.3"), Outcome::Passed);
        assert_eq!(outcome("eks-cis-3.1.4"), Outcome::Skipped);
        assert_eq!(outcome("eks-cis-3.2.3"), Outcome::Skipped);
        assert_eq!(outcome("eks-cis-3.2.4"), Outcome::Passed);
        assert_eq!(outcome("eks-cis-3.2.5"), Outcome::Skipped);
        assert!(summary.records.iter().all(|r| !r.explanation.is_empty()));
        assert!(!summary.has_failures_at_or_above(eksaudit_core::Severity::Low));
    }
}
