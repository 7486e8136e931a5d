use cvm_deploy::{DeploymentOutcome, DeploymentStatus, Operation};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

/// Appends `key=value` lines to the CI output file, or logs them on local runs.
#[derive(Debug, Clone, Default)]
pub struct ActionOutputs {
    path: Option<PathBuf>,
}

impl ActionOutputs {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.filter(|path| !path.as_os_str().is_empty()),
        }
    }

    /// Write a single output. Failures are logged and never abort the run.
    pub fn set(&self, name: &str, value: &str) {
        let Some(path) = &self.path else {
            info!("Local run (no GITHUB_OUTPUT): {name}={value}");
            return;
        };

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(format_output(name, value).as_bytes()));

        match written {
            Ok(()) => info!("Action output set: {name}={value}"),
            Err(e) => error!("Failed to write output {name} to {}: {e}", path.display()),
        }
    }

    /// Write `operation`, `status`, `vm-id` and `vm-name` for a finished run.
    pub fn record(&self, outcome: &DeploymentOutcome) {
        self.set("operation", operation_label(outcome));
        self.set("status", status_label(outcome.status));
        self.set("vm-id", &outcome.vm_id);
        self.set("vm-name", &outcome.vm_name);
    }
}

/// Render one output entry. Multi-line values use the `name<<DELIM` block form with a
/// random delimiter so a value cannot inject extra outputs.
fn format_output(name: &str, value: &str) -> String {
    if value.contains(['\n', '\r']) {
        let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
        format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
    } else {
        format!("{name}={value}\n")
    }
}

pub fn operation_label(outcome: &DeploymentOutcome) -> &'static str {
    match (outcome.operation, outcome.status) {
        (Operation::Create, _) => "create",
        (Operation::Update, DeploymentStatus::Skipped) => "update_skipped",
        (Operation::Update, _) => "update",
    }
}

pub fn status_label(status: DeploymentStatus) -> &'static str {
    match status {
        DeploymentStatus::Success | DeploymentStatus::Skipped => "success",
        DeploymentStatus::Failed => "failed",
    }
}
