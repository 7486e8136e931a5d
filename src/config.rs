use clap::Parser;
use cvm_deploy::{
    parse_exclude_list, read_text_file, ClientConfig, DeploymentRequest, Error, Operation,
    SecretCollector, SecretSource, VmResources, DEFAULT_API_URL,
};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Inputs of a deployment run. Every option can also be set through the environment
/// variable named next to it, which is how the CI integration passes them.
#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Control-plane API key
    #[arg(long, env = "PHALA_CLOUD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Control-plane base URL
    #[arg(long, env = "PHALA_CLOUD_API_URL")]
    pub api_url: Option<String>,

    /// Per-request deadline in seconds
    #[arg(long, env = "INPUT_REQUEST_TIMEOUT")]
    pub request_timeout: Option<String>,

    /// Name of the VM and its compose manifest
    #[arg(long, env = "INPUT_VM_NAME")]
    pub vm_name: Option<String>,

    /// Existing VM to update; a new VM is created when empty
    #[arg(long, env = "INPUT_VM_ID")]
    pub vm_id: Option<String>,

    /// Base image for a new VM
    #[arg(long, env = "INPUT_IMAGE")]
    pub image: Option<String>,

    /// Path to the docker compose template
    #[arg(long, env = "INPUT_DOCKER_COMPOSE_FILE")]
    pub docker_compose_file: Option<String>,

    /// Value substituted for ${DOCKER_TAG} in the compose template
    #[arg(long, env = "INPUT_DOCKER_TAG")]
    pub docker_tag: Option<String>,

    /// Path to a pre-launch script
    #[arg(long, env = "INPUT_PRELAUNCH_SCRIPT_FILE")]
    pub prelaunch_script_file: Option<String>,

    /// Teepod to create the VM on; the first available one is used when empty
    #[arg(long, env = "INPUT_TEEPOD_ID")]
    pub teepod_id: Option<String>,

    /// Number of vCPUs [default: 2]
    #[arg(long, env = "INPUT_VCPU")]
    pub vcpu: Option<String>,

    /// Memory in MiB [default: 8192]
    #[arg(long, env = "INPUT_MEMORY")]
    pub memory: Option<String>,

    /// Disk size in GiB [default: 40]
    #[arg(long, env = "INPUT_DISK_SIZE")]
    pub disk_size: Option<String>,

    /// JSON object of secret name to value
    #[arg(long, env = "INPUT_DOPPLER_SECRETS_JSON", hide_env_values = true)]
    pub secrets_json: Option<String>,

    /// JSON array of secret names to leave out
    #[arg(long, env = "INPUT_EXCLUDE_ENV_VARS")]
    pub exclude_env_vars: Option<String>,

    /// File of TARGET=SOURCE lines resolved against the environment
    #[arg(long, env = "INPUT_ENV_MAPPING_FILE")]
    pub env_mapping_file: Option<String>,

    /// Record existing-VM runs as update_skipped without touching the VM
    #[arg(long, env = "INPUT_SKIP_UPDATE")]
    pub skip_update: Option<String>,

    /// File that receives key=value outputs for the CI system
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub github_output: Option<PathBuf>,
}

#[derive(Clone)]
pub enum SecretsConfig {
    None,
    Json {
        secrets_json: String,
        exclude: Vec<String>,
    },
    MappingFile {
        path: PathBuf,
        exclude: Vec<String>,
    },
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretsConfig::None => f.write_str("None"),
            SecretsConfig::Json { exclude, .. } => f
                .debug_struct("Json")
                .field("secrets_json", &"<redacted>")
                .field("exclude", exclude)
                .finish(),
            SecretsConfig::MappingFile { path, exclude } => f
                .debug_struct("MappingFile")
                .field("path", path)
                .field("exclude", exclude)
                .finish(),
        }
    }
}

/// Validated settings for one deployment run.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub client: ClientConfig,
    pub vm_name: String,
    pub vm_id: Option<String>,
    pub image: Option<String>,
    pub docker_compose_file: PathBuf,
    pub docker_tag: Option<String>,
    pub prelaunch_script_file: Option<PathBuf>,
    pub teepod_id: Option<u64>,
    pub resources: VmResources,
    pub secrets: SecretsConfig,
    pub skip_update: bool,
}

impl DeploySettings {
    /// Operation implied by the inputs alone.
    pub fn operation(&self) -> Operation {
        if self.vm_id.is_some() {
            Operation::Update
        } else {
            Operation::Create
        }
    }

    /// Read the referenced files and collect secrets.
    pub fn load_request(&self) -> Result<DeploymentRequest, Error> {
        let docker_compose = read_text_file(&self.docker_compose_file)?;
        let pre_launch_script = self
            .prelaunch_script_file
            .as_ref()
            .map(|path| read_text_file(path))
            .transpose()?;

        let secrets = match &self.secrets {
            SecretsConfig::None => SecretCollector::default().collect(&SecretSource::None)?,
            SecretsConfig::Json {
                secrets_json,
                exclude,
            } => SecretCollector::new(exclude.clone())
                .collect(&SecretSource::from_json(secrets_json)?)?,
            SecretsConfig::MappingFile { path, exclude } => SecretCollector::new(exclude.clone())
                .collect(&SecretSource::MappingFile(read_text_file(path)?))?,
        };

        Ok(DeploymentRequest {
            vm_name: self.vm_name.clone(),
            docker_compose,
            docker_tag: self.docker_tag.clone(),
            pre_launch_script,
            resources: self.resources,
            secrets,
        })
    }
}

impl Args {
    /// Validate all inputs once. CI systems pass unset inputs as empty strings, so
    /// blank values count as absent.
    pub fn into_settings(self) -> Result<DeploySettings, Error> {
        let api_key = required(self.api_key, "PHALA_CLOUD_API_KEY")?;
        let vm_name = required(self.vm_name, "INPUT_VM_NAME")?;
        let docker_compose_file = required(self.docker_compose_file, "INPUT_DOCKER_COMPOSE_FILE")?;
        let vm_id = present(self.vm_id);
        let image = present(self.image);

        if vm_id.is_none() && image.is_none() {
            return Err(Error::Configuration(
                "INPUT_IMAGE is required when INPUT_VM_ID is not set".into(),
            ));
        }

        let defaults = VmResources::default();
        let resources = VmResources {
            vcpu: positive(self.vcpu, "INPUT_VCPU", defaults.vcpu)?,
            memory: positive(self.memory, "INPUT_MEMORY", defaults.memory)?,
            disk_size: positive(self.disk_size, "INPUT_DISK_SIZE", defaults.disk_size)?,
        };

        let teepod_id = present(self.teepod_id)
            .map(|id| {
                id.parse::<u64>().map_err(|_| {
                    Error::Configuration(format!("INPUT_TEEPOD_ID must be an integer, got '{id}'"))
                })
            })
            .transpose()?;

        let timeout = positive(
            self.request_timeout,
            "INPUT_REQUEST_TIMEOUT",
            cvm_deploy::DEFAULT_TIMEOUT.as_secs() as u32,
        )?;
        let client = ClientConfig::new(api_key)
            .with_api_url(present(self.api_url).unwrap_or_else(|| DEFAULT_API_URL.to_string()))
            .with_timeout(Duration::from_secs(timeout.into()));

        let exclude = match present(self.exclude_env_vars) {
            Some(exclude_json) => parse_exclude_list(&exclude_json)?,
            None => Vec::new(),
        };
        let secrets = match (present(self.secrets_json), present(self.env_mapping_file)) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "INPUT_DOPPLER_SECRETS_JSON and INPUT_ENV_MAPPING_FILE are mutually exclusive"
                        .into(),
                ))
            }
            (Some(secrets_json), None) => SecretsConfig::Json {
                secrets_json,
                exclude,
            },
            (None, Some(path)) => SecretsConfig::MappingFile {
                path: PathBuf::from(path),
                exclude,
            },
            (None, None) => SecretsConfig::None,
        };

        let skip_update = match present(self.skip_update).as_deref() {
            None => false,
            Some(value) => parse_bool(value, "INPUT_SKIP_UPDATE")?,
        };

        Ok(DeploySettings {
            client,
            vm_name,
            vm_id,
            image,
            docker_compose_file: PathBuf::from(docker_compose_file),
            docker_tag: present(self.docker_tag),
            prelaunch_script_file: present(self.prelaunch_script_file).map(PathBuf::from),
            teepod_id,
            resources,
            secrets,
            skip_update,
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(value: Option<String>, name: &str) -> Result<String, Error> {
    present(value).ok_or_else(|| Error::Configuration(format!("{name} is required")))
}

fn positive(value: Option<String>, name: &str, default: u32) -> Result<u32, Error> {
    match present(value) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u32>() {
            Ok(parsed) if parsed > 0 => Ok(parsed),
            _ => Err(Error::Configuration(format!(
                "{name} must be a positive integer, got '{raw}'"
            ))),
        },
    }
}

fn parse_bool(value: &str, name: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "{name} must be true or false, got '{value}'"
        ))),
    }
}
