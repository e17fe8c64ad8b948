//! Result aggregator - one report per run, keyed by control id

use chrono::{DateTime, Utc};
use eksaudit_core::{ControlRecord, Outcome, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Collects control records from concurrent workers
///
/// Recording the same control id twice overwrites the earlier record.
pub struct ResultAggregator {
    records: Mutex<BTreeMap<String, ControlRecord>>,
    started_at: DateTime<Utc>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            started_at: Utc::now(),
        }
    }

    /// Store a record, replacing any earlier one for the same control
    pub async fn record(&self, record: ControlRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn contains(&self, control_id: &str) -> bool {
        self.records.lock().await.contains_key(control_id)
    }

    /// Snapshot of the run so far
    pub async fn summary(&self) -> RunSummary {
        let records: Vec<ControlRecord> = self.records.lock().await.values().cloned().collect();
        RunSummary::from_records(records, self.started_at, Utc::now())
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of records per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Errored => self.errored += 1,
        }
    }

    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Passed => self.passed,
            Outcome::Failed => self.failed,
            Outcome::Skipped => self.skipped,
            Outcome::Errored => self.errored,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }
}

/// Coverage for a compliance framework
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplianceCoverage {
    /// Framework name
    pub framework: String,
    /// Controls mapped to the framework
    pub total: usize,
    /// Controls passing
    pub passing: usize,
    /// Controls failing
    pub failing: usize,
    /// Pass percentage over passing + failing controls
    pub pass_rate: f64,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub by_outcome: OutcomeCounts,
    /// Records per severity, any outcome
    pub by_severity: BTreeMap<Severity, usize>,
    /// Failed records per severity
    pub failures_by_severity: BTreeMap<Severity, usize>,
    pub compliance_coverage: BTreeMap<String, ComplianceCoverage>,
    /// Sorted by control id
    pub records: Vec<ControlRecord>,
}

impl RunSummary {
    pub fn from_records(
        mut records: Vec<ControlRecord>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_outcome = OutcomeCounts::default();
        let mut by_severity = BTreeMap::new();
        let mut failures_by_severity = BTreeMap::new();
        let mut compliance_coverage: BTreeMap<String, ComplianceCoverage> = BTreeMap::new();

        for record in &records {
            by_outcome.add(record.outcome);
            *by_severity.entry(record.severity).or_insert(0) += 1;
            if record.outcome == Outcome::Failed {
                *failures_by_severity.entry(record.severity).or_insert(0) += 1;
            }

            for framework in record.tags.frameworks() {
                let coverage = compliance_coverage
                    .entry(framework.to_string())
                    .or_insert_with(|| ComplianceCoverage {
                        framework: framework.to_string(),
                        ..Default::default()
                    });

                coverage.total += 1;
                match record.outcome {
                    Outcome::Passed => coverage.passing += 1,
                    Outcome::Failed => coverage.failing += 1,
                    _ => {}
                }
            }
        }

        for coverage in compliance_coverage.values_mut() {
            let evaluated = coverage.passing + coverage.failing;
            if evaluated > 0 {
                coverage.pass_rate = (coverage.passing as f64 / evaluated as f64) * 100.0;
            }
        }

        Self {
            started_at,
            finished_at,
            total: records.len(),
            by_outcome,
            by_severity,
            failures_by_severity,
            compliance_coverage,
            records,
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.by_outcome.get(outcome)
    }

    /// Whether any control at or above `severity` failed
    pub fn has_failures_at_or_above(&self, severity: Severity) -> bool {
        self.failures_by_severity
            .iter()
            .any(|(s, n)| *s >= severity && *n > 0)
    }

    pub fn record(&self, control_id: &str) -> Option<&ControlRecord> {
        self.records.iter().find(|r| r.id == control_id)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksaudit_core::{ComplianceTags, Control};
    use std::sync::Arc;

    fn control(id: &str, impact: f32) -> Control {
        Control::new(id, id, impact).with_tags(
            ComplianceTags::new()
                .with("nist", ["CM-6"])
                .with("cis_rid", [id]),
        )
    }

    #[tokio::test]
    async fn test_overwrite_not_accumulate() {
        let aggregator = ResultAggregator::new();
        let c = control("eks-cis-3.1.2", 0.5);

        aggregator.record(ControlRecord::errored(&c, "cancelled")).await;
        aggregator.record(ControlRecord::passed(&c, "root:root")).await;

        let summary = aggregator.summary().await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.count(Outcome::Passed), 1);
        assert_eq!(summary.count(Outcome::Errored), 0);
    }

    #[tokio::test]
    async fn test_summary_counts_and_order() {
        let aggregator = ResultAggregator::new();
        let high = control("eks-cis-4.2.9", 0.7);
        let medium = control("eks-cis-3.1.2", 0.5);
        let other = control("eks-cis-3.2.4", 0.5);
        let manual = control("eks-cis-4.1.4", 0.5);

        aggregator.record(ControlRecord::failed(&high, "capabilities allowed")).await;
        aggregator.record(ControlRecord::passed(&medium, "root:root")).await;
        aggregator.record(ControlRecord::failed(&other, "readOnlyPort 10255")).await;
        aggregator.record(ControlRecord::skipped(&manual, "manual review required")).await;

        let summary = aggregator.summary().await;
        let ids: Vec<_> = summary.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["eks-cis-3.1.2", "eks-cis-3.2.4", "eks-cis-4.1.4", "eks-cis-4.2.9"]);

        assert_eq!(summary.by_outcome.total(), 4);
        assert_eq!(summary.count(Outcome::Failed), 2);
        assert_eq!(summary.by_severity[&Severity::Medium], 3);
        assert_eq!(summary.failures_by_severity[&Severity::High], 1);
        assert!(summary.has_failures_at_or_above(Severity::High));
        assert!(!summary.has_failures_at_or_above(Severity::Critical));

        let nist = &summary.compliance_coverage["nist"];
        assert_eq!(nist.total, 4);
        assert_eq!(nist.passing, 1);
        assert_eq!(nist.failing, 2);
        assert!((nist.pass_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let aggregator = Arc::new(ResultAggregator::new());
        let mut handles = Vec::new();

        for i in 0..64 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                let c = control(&format!("ctl-{:03}", i), 0.5);
                aggregator.record(ControlRecord::passed(&c, "ok")).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(aggregator.len().await, 64);
        assert!(aggregator.contains("ctl-063").await);
    }

    #[test]
    fn test_summary_serializes() {
        let c = control("eks-cis-3.1.2", 0.5);
        let now = Utc::now();
        let summary = RunSummary::from_records(vec![ControlRecord::passed(&c, "ok")], now, now);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["by_outcome"]["passed"], 1);
        assert_eq!(json["by_severity"]["medium"], 1);
        assert_eq!(json["records"][0]["outcome"], "passed");
    }
}
