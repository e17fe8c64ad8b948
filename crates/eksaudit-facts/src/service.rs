//! Service state adapter backed by systemd

use crate::args::{exec_start_commands, parse_service_args};
use crate::FactSource;
use async_trait::async_trait;
use eksaudit_core::{Fact, FactSelector, FetchError, ServiceFlags};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

const PROPERTIES: &str = "LoadState,ActiveState,SubState,ExecStart";

/// Unit properties reported by `systemctl show`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitStatus {
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub exec_start: String,
}

impl UnitStatus {
    /// Parse `Key=Value` lines; unknown keys are ignored
    pub fn parse(output: &str) -> Self {
        let props: HashMap<&str, &str> = output
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let get = |key: &str| props.get(key).map(|v| v.to_string()).unwrap_or_default();

        Self {
            load_state: get("LoadState"),
            active_state: get("ActiveState"),
            sub_state: get("SubState"),
            exec_start: get("ExecStart"),
        }
    }

    /// Whether systemd knows the unit at all
    pub fn is_loaded(&self) -> bool {
        !self.load_state.is_empty() && self.load_state != "not-found"
    }

    pub fn is_running(&self) -> bool {
        self.is_loaded() && self.active_state == "active"
    }

    /// Flags of every command in `ExecStart`
    pub fn flags(&self) -> ServiceFlags {
        let commands = exec_start_commands(&self.exec_start);
        parse_service_args(commands.iter().map(String::as_str))
    }
}

/// Queries unit state through `systemctl show`
#[derive(Debug, Clone)]
pub struct SystemdAdapter {
    systemctl_path: String,
    timeout: Duration,
}

impl SystemdAdapter {
    pub fn new(systemctl_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            systemctl_path: systemctl_path.into(),
            timeout,
        }
    }

    /// Run `systemctl show` for one unit
    pub async fn status(&self, service: &str) -> Result<UnitStatus, FetchError> {
        let what = format!("{} show {}", self.systemctl_path, service);
        trace!("Running {}", what);

        let child = Command::new(&self.systemctl_path)
            .arg("show")
            .arg(service)
            .arg(format!("--property={}", PROPERTIES))
            .arg("--no-pager")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| FetchError::Timeout(format!("{} after {:?}", what, self.timeout)))?
            .map_err(|e| FetchError::from_io(&what, &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{} failed: {}", what, stderr.trim());
            return Err(FetchError::NotFound(format!(
                "{} exited with {}: {}",
                what,
                output.status,
                stderr.trim()
            )));
        }

        Ok(UnitStatus::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Whether the service is running; an unknown unit is not running
    pub async fn is_running(&self, service: &str) -> Result<bool, FetchError> {
        Ok(self.status(service).await?.is_running())
    }

    /// Flags of the service's start command
    pub async fn flags(&self, service: &str) -> Result<ServiceFlags, FetchError> {
        let status = self.status(service).await?;
        if !status.is_loaded() {
            return Err(FetchError::NotFound(format!("service {} is not installed", service)));
        }
        Ok(status.flags())
    }
}

impl Default for SystemdAdapter {
    fn default() -> Self {
        Self::new("systemctl", Duration::from_secs(10))
    }
}

#[async_trait]
impl FactSource for SystemdAdapter {
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
        match selector {
            FactSelector::ServiceRunning { service } => Ok(Fact::ServiceState {
                running: self.is_running(service).await?,
            }),
            FactSelector::ServiceArgs { service } => {
                Ok(Fact::ServiceArgs(self.flags(service).await?))
            }
            other => Err(crate::unsupported(other)),
        }
    }
}
