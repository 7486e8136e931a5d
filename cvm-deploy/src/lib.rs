//! # CVM Deploy
//!
//! Provision confidential VMs on Phala Cloud and deliver secret environment variables
//! that only the VM's trusted execution environment can decrypt.
//!
//! ## Features
//!
//! - Hybrid encryption of environment variables: ephemeral X25519 key agreement with the
//!   TEE's public key, then AES-256-GCM
//! - Typed client for the CVM lifecycle endpoints
//! - Create-or-update reconciliation driven by an optional existing VM id
//! - Secret collection from a JSON map or a name-mapping file
//!
//! ## Example
//!
//! ```rust,no_run
//! use cvm_deploy::{
//!     ClientConfig, CvmClient, Deployer, DeploymentRequest, SecretEntry, VmResources,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CvmClient::new(ClientConfig::new("your-api-key".to_string()))?;
//!     let deployer = Deployer::new(client);
//!
//!     let request = DeploymentRequest {
//!         vm_name: "my-app".to_string(),
//!         docker_compose: "services:\n  app:\n    image: org/app:${DOCKER_TAG}\n".to_string(),
//!         docker_tag: Some("v1.2.0".to_string()),
//!         pre_launch_script: None,
//!         resources: VmResources::default(),
//!         secrets: vec![SecretEntry::new("API_KEY", "secret")],
//!     };
//!
//!     let target = deployer.resolve_target(None, None, Some("dstack-0.3.5")).await?;
//!     let outcome = deployer.deploy(&target, &request).await?;
//!
//!     println!("Deployed: {}", outcome.vm_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! 1. A new ephemeral key pair is generated for every encryption and never stored
//! 2. AES-GCM provides authenticated encryption
//! 3. Secret values and key material are never logged
//! 4. `SecretEntry` and `ClientConfig` redact sensitive fields in their `Debug` output
//! 5. The ephemeral scalar, shared secret and plaintext payload are zeroized after use

mod client;
mod config;
mod crypto;
mod deploy;
mod error;
mod secrets;
mod types;

pub use client::CvmClient;
pub use config::{ClientConfig, VmResources, DEFAULT_API_URL, DEFAULT_TIMEOUT};
pub use crypto::{encrypt_env_vars, parse_public_key};
pub use deploy::{render_compose, Deployer, DeploymentRequest, DOCKER_TAG_PLACEHOLDER};
pub use error::Error;
pub use secrets::{parse_exclude_list, SecretCollector, SecretSource};
pub use types::*;

/// Result type for CVM deployment operations
pub type Result<T> = std::result::Result<T, Error>;

/// Read a compose, script or mapping file, keeping the path in the error.
pub fn read_text_file(path: impl AsRef<std::path::Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| Error::FileAccess {
        path: path.to_path_buf(),
        source,
    })
}
