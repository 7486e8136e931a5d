use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single environment variable to deliver to the VM.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub key: String,
    pub value: String,
}

impl SecretEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Which VM a deployment run acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmTarget {
    /// Create a fresh VM on the given teepod.
    New { teepod_id: u64, image: String },
    /// Update the compose manifest of a VM that already exists.
    Existing { vm_id: String },
}

impl VmTarget {
    pub fn operation(&self) -> Operation {
        match self {
            VmTarget::New { .. } => Operation::Create,
            VmTarget::Existing { .. } => Operation::Update,
        }
    }
}

/// Full compose manifest sent when creating a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeManifest {
    pub manifest_version: u32,
    pub name: String,
    pub docker_compose_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch_script: Option<String>,
    pub tproxy_enabled: bool,
    pub kms_enabled: bool,
    pub public_sysinfo: bool,
    pub public_logs: bool,
}

/// Reduced manifest for updates; the control plane merges it into the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateComposeManifest {
    pub name: String,
    pub docker_compose_file: String,
    pub public_logs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    pub compose_manifest: ComposeManifest,
    pub vcpu: u32,
    pub memory: u32,
    pub disk_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teepod_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub listed: bool,
}

/// Body of `POST /cvms/from_cvm_configuration`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateVmRequest {
    #[serde(flatten)]
    pub vm_config: VmConfig,
    pub app_id_salt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_env: Option<String>,
}

/// Body of `PUT /cvms/{id}/compose`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateComposeRequest {
    pub compose_manifest: UpdateComposeManifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubkeyResponse {
    pub app_env_encrypt_pubkey: String,
    pub app_id_salt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedVm {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: HashMap<String, serde_json::Value>,
}

/// Compose state of an existing VM as reported by `GET /cvms/{id}/compose`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeState {
    #[serde(default)]
    pub env_pubkey: Option<String>,
    #[serde(default)]
    pub public_logs: Option<bool>,
    #[serde(flatten)]
    pub details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableTeepods {
    #[serde(default)]
    pub nodes: Vec<Teepod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Teepod {
    pub teepod_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub vm_id: String,
    pub vm_name: String,
    pub status: DeploymentStatus,
    pub operation: Operation,
}

impl DeploymentOutcome {
    pub fn failed(operation: Operation, vm_id: Option<&str>, vm_name: &str) -> Self {
        Self {
            vm_id: vm_id.unwrap_or("N/A").to_string(),
            vm_name: vm_name.to_string(),
            status: DeploymentStatus::Failed,
            operation,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(id) => id,
        Id::Number(id) => id.to_string(),
    })
}
