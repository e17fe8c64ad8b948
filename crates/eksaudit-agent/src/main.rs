//! EKS Audit Agent - runs CIS Amazon EKS controls on a worker node
//!
//! The agent loads the built-in control bundle (plus any YAML controls from
//! a directory), resolves inputs from config, environment and command line,
//! evaluates the selected controls concurrently and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use eksaudit_checks::{eks, load_into, ControlRegistry};
use eksaudit_common::logging::{LogConfig, LogFormat};
use eksaudit_common::{Config, InputResolver};
use eksaudit_core::{ControlRecord, Outcome, Severity};
use eksaudit_engine::{CancelSignal, Engine, RunSummary};
use eksaudit_facts::LocalFactSource;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// EKS compliance audit agent
#[derive(Parser, Debug)]
#[command(name = "eksaudit-agent")]
#[command(version)]
#[command(about = "Evaluate CIS Amazon EKS controls against this node", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Input override as name=value (repeatable)
    #[arg(short, long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Run only this control (repeatable)
    #[arg(long = "control", value_name = "ID")]
    controls: Vec<String>,

    /// Directory of additional YAML control definitions
    #[arg(long)]
    controls_dir: Option<String>,

    /// Controls evaluated at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Output format for results (text, json, table)
    #[arg(long, default_value = "text")]
    format: String,

    /// Only show failed and errored controls
    #[arg(long)]
    failures_only: bool,

    /// Filter by minimum severity (info, low, medium, high, critical)
    #[arg(long)]
    min_severity: Option<String>,
}

fn default_config_path() -> String {
    String::from("/etc/eksaudit/agent.toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config_exists = std::path::Path::new(&config_path).exists();
    if args.config.is_some() && !config_exists {
        anyhow::bail!("config file {} does not exist", config_path);
    }
    let config = if config_exists {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    let mut config = config.merge_env();

    if let Some(n) = args.concurrency {
        config.engine.max_concurrent_controls = n;
    }
    if let Some(dir) = &args.controls_dir {
        config.engine.controls_dir = Some(dir.clone());
    }
    config.validate()?;

    let mut log_config = LogConfig::from_settings(&config.logging);
    if let Some(level) = &args.log_level {
        log_config = log_config.level(level);
    }
    if let Some(format) = &args.log_format {
        log_config = log_config.format(LogFormat::parse(format));
    }
    eksaudit_common::logging::init_logging_with_config(log_config)?;

    info!("EKS Audit Agent v{}", env!("CARGO_PKG_VERSION"));
    if config_exists {
        info!("Loaded config from: {}", config_path);
    } else {
        debug!("Config file not found, using defaults");
    }

    let min_severity = match &args.min_severity {
        Some(s) => Some(
            Severity::parse(s).with_context(|| format!("unknown severity '{}'", s))?,
        ),
        None => None,
    };

    let mut registry = ControlRegistry::builtin();
    if let Some(dir) = &config.engine.controls_dir {
        load_into(&mut registry, dir)
            .with_context(|| format!("loading controls from {}", dir))?;
    }

    let controls = if args.controls.is_empty() {
        registry.all()
    } else {
        registry.by_ids(&args.controls)?
    };

    let inputs = InputResolver::new(eks::input_declarations())
        .with_profile(&config.inputs)
        .with_env()
        .with_cli_overrides(&args.inputs)?
        .snapshot();

    let source = LocalFactSource::from_config(&config.adapters)?;
    let engine = Engine::from_config(Arc::new(source), &config.engine);

    let cancel = CancelSignal::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling remaining controls");
            on_signal.cancel();
        }
    });

    let summary = engine.run(controls, inputs, cancel).await;

    match args.format.as_str() {
        "json" => print_results_json(&summary, args.failures_only, min_severity)?,
        "table" => print_results_table(&summary, args.failures_only, min_severity),
        _ => print_results_text(&summary, args.failures_only, min_severity),
    }

    // Exit with non-zero status if there are high/critical failures
    if summary.has_failures_at_or_above(Severity::High) {
        let count: usize = summary
            .failures_by_severity
            .iter()
            .filter(|(s, _)| **s >= Severity::High)
            .map(|(_, n)| n)
            .sum();
        warn!("{} high/critical severity controls failed", count);
        std::process::exit(1);
    }

    Ok(())
}

fn visible(record: &ControlRecord, failures_only: bool, min_severity: Option<Severity>) -> bool {
    if failures_only && !matches!(record.outcome, Outcome::Failed | Outcome::Errored) {
        return false;
    }
    min_severity.map_or(true, |min| record.severity >= min)
}

/// Print results as JSON
fn print_results_json(
    summary: &RunSummary,
    failures_only: bool,
    min_severity: Option<Severity>,
) -> Result<()> {
    let mut report = summary.clone();
    report
        .records
        .retain(|r| visible(r, failures_only, min_severity));

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print results as table
fn print_results_table(summary: &RunSummary, failures_only: bool, min_severity: Option<Severity>) {
    println!("\n{:<16} {:<56} {:<10} {:<10}", "CONTROL ID", "TITLE", "OUTCOME", "SEVERITY");
    println!("{}", "-".repeat(95));

    for r in summary.records.iter().filter(|r| visible(r, failures_only, min_severity)) {
        println!(
            "{:<16} {:<56} {}{:<10}\x1b[0m {:<10}",
            r.id,
            truncate(&r.title, 54),
            outcome_color(r.outcome),
            r.outcome.as_str().to_uppercase(),
            r.severity.as_str()
        );
    }

    println!("\n{}", "-".repeat(95));
    print_summary(summary);
}

/// Print results as text
fn print_results_text(summary: &RunSummary, failures_only: bool, min_severity: Option<Severity>) {
    println!("\n=== EKS Compliance Results ===\n");

    for r in summary.records.iter().filter(|r| visible(r, failures_only, min_severity)) {
        println!("[{}] {} - {}", r.outcome.as_str().to_uppercase(), r.id, r.title);
        println!("    Severity: {} (impact {:.1})", r.severity, r.impact);
        println!("    Result:   {}", r.explanation);
        if let Some(rid) = r.tags.sections("cis_rid").first() {
            println!("    CIS:      {}", rid);
        }
        println!();
    }

    print_summary(summary);
}

fn print_summary(summary: &RunSummary) {
    let counts = &summary.by_outcome;
    println!("Summary:");
    println!("  Total:   {}", summary.total);
    println!(
        "  Passed:  {} ({:.1}%)",
        counts.passed,
        if summary.total > 0 {
            counts.passed as f64 / summary.total as f64 * 100.0
        } else {
            0.0
        }
    );
    println!("  Failed:  {}", counts.failed);
    println!("  Errored: {}", counts.errored);
    println!("  Skipped: {}", counts.skipped);
    println!("  Took:    {} ms", summary.duration_ms());

    if !summary.compliance_coverage.is_empty() {
        println!("\nCompliance Coverage:");
        for (framework, coverage) in &summary.compliance_coverage {
            println!(
                "  {}: {}/{} ({:.1}%)",
                framework,
                coverage.passing,
                coverage.passing + coverage.failing,
                coverage.pass_rate
            );
        }
    }
}

fn outcome_color(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "\x1b[32m",
        Outcome::Failed => "\x1b[31m",
        Outcome::Errored => "\x1b[33m",
        Outcome::Skipped => "\x1b[90m",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksaudit_core::Control;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "eksaudit-agent",
            "--input",
            "kubelet_config=/etc/kubernetes/kubelet/kubelet-config.json",
            "-i",
            "node_name=node-1",
            "--control",
            "eks-cis-3.2.4",
            "--format",
            "json",
            "--failures-only",
        ])
        .unwrap();

        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.controls, vec!["eks-cis-3.2.4"]);
        assert_eq!(args.format, "json");
        assert!(args.failures_only);
    }

    #[test]
    fn test_visibility_filters() {
        let high = Control::new("eks-cis-4.2.9", "capabilities", 0.7);
        let medium = Control::new("eks-cis-3.1.2", "kubeconfig", 0.5);

        let failed = ControlRecord::failed(&high, "allowed");
        let passed = ControlRecord::passed(&medium, "root:root");
        let errored = ControlRecord::errored(&medium, "cancelled");

        assert!(visible(&failed, true, None));
        assert!(visible(&errored, true, None));
        assert!(!visible(&passed, true, None));
        assert!(!visible(&passed, false, Some(Severity::High)));
        assert!(visible(&failed, false, Some(Severity::High)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
