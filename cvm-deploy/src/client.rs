use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::{
    config::ClientConfig,
    error::Error,
    types::{
        AvailableTeepods, ComposeState, CreateVmRequest, CreatedVm, PubkeyResponse, Teepod,
        UpdateComposeRequest, VmConfig,
    },
};

/// Client for the Phala Cloud CVM lifecycle API.
///
/// Every call is a single request with no automatic retry; a non-2xx response becomes
/// [`Error::Remote`] with the raw status and body.
pub struct CvmClient {
    client: Client,
    config: ClientConfig,
}

impl CvmClient {
    /// Create a new CvmClient with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Request the env encryption key and app id salt for a VM that does not exist yet.
    pub async fn get_pubkey(&self, vm_config: &VmConfig) -> Result<PubkeyResponse, Error> {
        debug!(
            "Requesting pubkey for configuration: {}",
            serde_json::to_string(vm_config).unwrap_or_default()
        );
        let request = self
            .request(Method::POST, "/cvms/pubkey/from_cvm_configuration")
            .json(vm_config);
        self.send(request).await
    }

    pub async fn create_vm(&self, payload: &CreateVmRequest) -> Result<CreatedVm, Error> {
        info!(
            "Creating VM '{}' on teepod {:?} (encrypted env: {} bytes)",
            payload.vm_config.name,
            payload.vm_config.teepod_id,
            payload.encrypted_env.as_ref().map_or(0, |env| env.len() / 2)
        );
        let request = self
            .request(Method::POST, "/cvms/from_cvm_configuration")
            .json(payload);
        self.send(request).await
    }

    /// Fetch the compose state of an existing VM, including its env public key.
    pub async fn get_compose(&self, vm_id: &str) -> Result<ComposeState, Error> {
        info!("Fetching compose details for VM {vm_id}");
        let request = self.request(Method::GET, &format!("/cvms/{vm_id}/compose"));
        self.send(request).await.map_err(|e| match e {
            Error::Remote {
                status_code: Some(404),
                ..
            } => Error::NotFound(vm_id.to_string()),
            other => other,
        })
    }

    /// Replace the compose manifest of an existing VM. The acknowledgment body is
    /// returned as-is and may be `Null`.
    pub async fn update_compose(
        &self,
        vm_id: &str,
        payload: &UpdateComposeRequest,
    ) -> Result<serde_json::Value, Error> {
        info!(
            "Updating compose for VM {vm_id} (encrypted env: {} bytes)",
            payload.encrypted_env.as_ref().map_or(0, |env| env.len() / 2)
        );
        let request = self
            .request(Method::PUT, &format!("/cvms/{vm_id}/compose"))
            .json(payload);
        self.send(request).await
    }

    /// List teepods currently able to host a new VM, in the order the API returns them.
    pub async fn available_teepods(&self) -> Result<Vec<Teepod>, Error> {
        info!("Requesting available teepods");
        let request = self.request(Method::GET, "/teepods/available");
        let available: AvailableTeepods = self.send(request).await?;
        Ok(available.nodes)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.api_url, path))
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| body_read_failure(status, e))?;

        if !status.is_success() {
            error!("Request to {url} failed with HTTP {}", status.as_u16());
            return Err(Error::Remote {
                status_code: Some(status.as_u16()),
                body,
            });
        }

        let body = if body.trim().is_empty() { "null" } else { &body };
        serde_json::from_str(body).map_err(|e| Error::Remote {
            status_code: Some(status.as_u16()),
            body: format!("unexpected response body ({e}): {body}"),
        })
    }
}

/// A body that cannot be read still reports the status that was received.
fn body_read_failure(status: StatusCode, err: impl std::fmt::Display) -> Error {
    error!("Failed to read response body after HTTP {}", status.as_u16());
    Error::Remote {
        status_code: Some(status.as_u16()),
        body: format!("failed to read response body: {err}"),
    }
}
