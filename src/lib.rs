//! CI entry point for deploying a Phala Cloud confidential VM.
//!
//! Reads a validated [`DeploySettings`], creates or updates the VM through
//! [`cvm_deploy::Deployer`] and reports the result through [`ActionOutputs`].

pub mod config;
pub mod outputs;

pub use config::{Args, DeploySettings, SecretsConfig};
pub use outputs::ActionOutputs;

use cvm_deploy::{CvmClient, Deployer, DeploymentOutcome, Error};
use tracing::{error, info};

/// Run one deployment and record its outcome. Any failure is recorded as
/// `status=failed` before it is returned.
pub async fn run(settings: &DeploySettings, outputs: &ActionOutputs) -> Result<DeploymentOutcome, Error> {
    match deploy(settings).await {
        Ok(outcome) => {
            outputs.record(&outcome);
            Ok(outcome)
        }
        Err(e) => {
            error!("An error occurred during deployment: {e}");
            outputs.record(&DeploymentOutcome::failed(
                settings.operation(),
                settings.vm_id.as_deref(),
                &settings.vm_name,
            ));
            Err(e)
        }
    }
}

async fn deploy(settings: &DeploySettings) -> Result<DeploymentOutcome, Error> {
    let request = settings.load_request()?;
    if let Some(tag) = &request.docker_tag {
        info!("Using Docker tag: {tag}");
    }

    let client = CvmClient::new(settings.client.clone())?;
    let deployer = Deployer::new(client).with_skip_update(settings.skip_update);

    let target = deployer
        .resolve_target(
            settings.vm_id.as_deref(),
            settings.teepod_id,
            settings.image.as_deref(),
        )
        .await?;

    deployer.deploy(&target, &request).await
}
