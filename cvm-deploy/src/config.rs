use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://cloud-api.phala.network/api/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the Phala Cloud control plane.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for the control-plane API
    pub api_url: String,

    /// API key sent as `x-api-key` on every request
    pub api_key: String,

    /// Deadline applied to each request
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Sizing of a newly created VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmResources {
    pub vcpu: u32,
    /// Memory in MiB
    pub memory: u32,
    /// Disk size in GiB
    pub disk_size: u32,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            vcpu: 2,
            memory: 8192,
            disk_size: 40,
        }
    }
}
