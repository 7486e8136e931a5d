use tracing::{info, warn};

use crate::{
    client::CvmClient,
    config::VmResources,
    crypto::encrypt_env_vars,
    error::Error,
    types::{
        ComposeManifest, CreateVmRequest, DeploymentOutcome, DeploymentStatus, Operation,
        SecretEntry, UpdateComposeManifest, UpdateComposeRequest, VmConfig, VmTarget,
    },
};

pub const DOCKER_TAG_PLACEHOLDER: &str = "${DOCKER_TAG}";
pub const MANIFEST_VERSION: u32 = 2;

/// Everything needed to build the payload for either deployment path.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub vm_name: String,
    /// Compose file content, possibly containing `${DOCKER_TAG}`
    pub docker_compose: String,
    pub docker_tag: Option<String>,
    /// Pre-launch script content, already read from disk
    pub pre_launch_script: Option<String>,
    pub resources: VmResources,
    pub secrets: Vec<SecretEntry>,
}

impl DeploymentRequest {
    /// Compose content with the docker tag substituted.
    pub fn rendered_compose(&self) -> String {
        render_compose(&self.docker_compose, self.docker_tag.as_deref())
    }
}

/// Replace every `${DOCKER_TAG}` with `docker_tag`. No other templating is performed.
pub fn render_compose(template: &str, docker_tag: Option<&str>) -> String {
    match docker_tag {
        Some(tag) => template.replace(DOCKER_TAG_PLACEHOLDER, tag),
        None => template.to_string(),
    }
}

/// Decides between creating and updating a VM and drives the control-plane calls.
pub struct Deployer {
    client: CvmClient,
    skip_update: bool,
}

impl Deployer {
    pub fn new(client: CvmClient) -> Self {
        Self {
            client,
            skip_update: false,
        }
    }

    /// Record existing-VM deployments as skipped instead of updating them.
    pub fn with_skip_update(mut self, skip_update: bool) -> Self {
        self.skip_update = skip_update;
        self
    }

    /// Resolve the target VM. An existing VM id wins; otherwise the explicit teepod is
    /// used, falling back to the first available one.
    pub async fn resolve_target(
        &self,
        vm_id: Option<&str>,
        teepod_id: Option<u64>,
        image: Option<&str>,
    ) -> Result<VmTarget, Error> {
        if let Some(vm_id) = vm_id.map(str::trim).filter(|id| !id.is_empty()) {
            info!("Updating existing VM with ID: {vm_id}");
            return Ok(VmTarget::Existing {
                vm_id: vm_id.to_string(),
            });
        }

        let image = image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| Error::Configuration("an image is required to create a VM".into()))?;

        let teepod_id = match teepod_id {
            Some(teepod_id) => {
                info!("Using specified teepod ID: {teepod_id}");
                teepod_id
            }
            None => {
                info!("No teepod ID specified, finding an available one");
                let pod = self
                    .client
                    .available_teepods()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(Error::NoCapacity)?;
                info!("Automatically selected available teepod ID: {}", pod.teepod_id);
                pod.teepod_id
            }
        };

        Ok(VmTarget::New {
            teepod_id,
            image: image.to_string(),
        })
    }

    /// Run the create or update path for `target`.
    pub async fn deploy(
        &self,
        target: &VmTarget,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, Error> {
        match target {
            VmTarget::New { teepod_id, image } => self.create(*teepod_id, image, request).await,
            VmTarget::Existing { vm_id } if self.skip_update => {
                warn!("Skipping update of existing VM {vm_id}");
                Ok(DeploymentOutcome {
                    vm_id: vm_id.clone(),
                    vm_name: request.vm_name.clone(),
                    status: DeploymentStatus::Skipped,
                    operation: Operation::Update,
                })
            }
            VmTarget::Existing { vm_id } => self.update(vm_id, request).await,
        }
    }

    async fn create(
        &self,
        teepod_id: u64,
        image: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, Error> {
        info!("Creating new VM: {}", request.vm_name);

        let vm_config = VmConfig {
            name: request.vm_name.clone(),
            compose_manifest: ComposeManifest {
                manifest_version: MANIFEST_VERSION,
                name: request.vm_name.clone(),
                docker_compose_file: request.rendered_compose(),
                pre_launch_script: request.pre_launch_script.clone(),
                tproxy_enabled: true,
                kms_enabled: true,
                public_sysinfo: true,
                public_logs: false,
            },
            vcpu: request.resources.vcpu,
            memory: request.resources.memory,
            disk_size: request.resources.disk_size,
            teepod_id: Some(teepod_id),
            image: Some(image.to_string()),
            listed: false,
        };

        let pubkey = self.client.get_pubkey(&vm_config).await?;
        let encrypted_env = encrypt_if_needed(&request.secrets, &pubkey.app_env_encrypt_pubkey)?;

        let payload = CreateVmRequest {
            vm_config,
            app_id_salt: pubkey.app_id_salt,
            encrypted_env,
        };
        let created = self.client.create_vm(&payload).await?;
        info!("VM creation initiated: {}", created.id);

        Ok(DeploymentOutcome {
            vm_id: created.id,
            vm_name: created.name.unwrap_or_else(|| request.vm_name.clone()),
            status: DeploymentStatus::Success,
            operation: Operation::Create,
        })
    }

    // The compose read and the following write are not atomic; a concurrent change
    // between them is overwritten.
    async fn update(
        &self,
        vm_id: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, Error> {
        let current = self.client.get_compose(vm_id).await?;

        let encrypted_env = if request.secrets.is_empty() {
            None
        } else {
            let env_pubkey = current.env_pubkey.as_deref().ok_or_else(|| {
                Error::InvalidKey(format!("control plane returned no env_pubkey for VM {vm_id}"))
            })?;
            encrypt_if_needed(&request.secrets, env_pubkey)?
        };

        let payload = UpdateComposeRequest {
            compose_manifest: UpdateComposeManifest {
                name: request.vm_name.clone(),
                docker_compose_file: request.rendered_compose(),
                public_logs: current.public_logs.unwrap_or(false),
                pre_launch_script: request.pre_launch_script.clone(),
            },
            encrypted_env,
        };
        self.client.update_compose(vm_id, &payload).await?;
        info!("VM update request accepted for {vm_id}");

        // The ack may not echo the VM identity, so the outcome is built from what we sent.
        Ok(DeploymentOutcome {
            vm_id: vm_id.to_string(),
            vm_name: request.vm_name.clone(),
            status: DeploymentStatus::Success,
            operation: Operation::Update,
        })
    }
}

fn encrypt_if_needed(secrets: &[SecretEntry], pubkey_hex: &str) -> Result<Option<String>, Error> {
    if secrets.is_empty() {
        info!("No secrets to encrypt");
        return Ok(None);
    }
    info!("Encrypting {} environment variable(s)", secrets.len());
    encrypt_env_vars(secrets, pubkey_hex).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::crypto::tests::{decrypt_env_vars, remote_keypair};
    use serde_json::{json, Value};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_deployer(api_url: String) -> Deployer {
        let config = ClientConfig::new("test_api_key".to_string())
            .with_api_url(api_url)
            .with_timeout(Duration::from_secs(5));
        Deployer::new(CvmClient::new(config).unwrap())
    }

    fn test_request(secrets: Vec<SecretEntry>) -> DeploymentRequest {
        DeploymentRequest {
            vm_name: "my-app".into(),
            docker_compose: "services:\n  app:\n    image: org/app:${DOCKER_TAG}\n".into(),
            docker_tag: Some("v2".into()),
            pre_launch_script: None,
            resources: VmResources::default(),
            secrets,
        }
    }

    async fn request_body(server: &MockServer, method_name: &str, url_path: &str) -> Value {
        let requests = server.received_requests().await.unwrap();
        let request = requests
            .iter()
            .find(|r| r.method.to_string() == method_name && r.url.path() == url_path)
            .expect("request was not sent");
        serde_json::from_slice(&request.body).unwrap()
    }

    async fn mount_pods(server: &MockServer, nodes: Value) {
        Mock::given(method("GET"))
            .and(path("/teepods/available"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "nodes": nodes })))
            .mount(server)
            .await;
    }

    async fn mount_create(server: &MockServer, pubkey_hex: &str) {
        Mock::given(method("POST"))
            .and(path("/cvms/pubkey/from_cvm_configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "app_env_encrypt_pubkey": pubkey_hex,
                "app_id_salt": "salt-123"
            })))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/cvms/from_cvm_configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1234,
                "name": "my-app",
                "status": "creating"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_update(server: &MockServer, vm_id: &str, compose: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/cvms/{vm_id}/compose")))
            .respond_with(ResponseTemplate::new(200).set_body_json(compose))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("PUT"))
            .and(path(format!("/cvms/{vm_id}/compose")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_render_compose_replaces_every_placeholder() {
        let template = "image: app:${DOCKER_TAG}\nlabel: ${DOCKER_TAG}";
        assert_eq!(
            render_compose(template, Some("v2")),
            "image: app:v2\nlabel: v2"
        );
    }

    #[test]
    fn test_render_compose_without_placeholder_is_unchanged() {
        let template = "image: app:latest";
        assert_eq!(render_compose(template, Some("v2")), template);
        assert_eq!(render_compose("${DOCKER_TAG}", None), "${DOCKER_TAG}");
    }

    #[tokio::test]
    async fn test_resolve_target_picks_first_available_pod() {
        let mock_server = MockServer::start().await;
        mount_pods(&mock_server, json!([{ "teepod_id": 7 }, { "teepod_id": 9 }])).await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = deployer
            .resolve_target(None, None, Some("dstack-0.3.5"))
            .await
            .unwrap();

        assert_eq!(
            target,
            VmTarget::New {
                teepod_id: 7,
                image: "dstack-0.3.5".into()
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_target_with_explicit_pod_skips_listing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teepods/available"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = deployer
            .resolve_target(None, Some(3), Some("dstack-0.3.5"))
            .await
            .unwrap();

        assert_eq!(target.operation(), Operation::Create);
        assert!(matches!(target, VmTarget::New { teepod_id: 3, .. }));
    }

    #[tokio::test]
    async fn test_resolve_target_prefers_existing_vm() {
        let mock_server = MockServer::start().await;
        let deployer = create_test_deployer(mock_server.uri());

        let target = deployer
            .resolve_target(Some(" vm-42 "), Some(3), None)
            .await
            .unwrap();
        assert_eq!(
            target,
            VmTarget::Existing {
                vm_id: "vm-42".into()
            }
        );

        let blank = deployer.resolve_target(Some("  "), Some(3), Some("img")).await;
        assert!(matches!(blank, Ok(VmTarget::New { .. })));
    }

    #[tokio::test]
    async fn test_resolve_target_without_capacity() {
        let mock_server = MockServer::start().await;
        mount_pods(&mock_server, json!([])).await;

        let deployer = create_test_deployer(mock_server.uri());
        let result = deployer.resolve_target(None, None, Some("img")).await;

        assert!(matches!(result, Err(Error::NoCapacity)));
    }

    #[tokio::test]
    async fn test_resolve_target_requires_image_for_create() {
        let mock_server = MockServer::start().await;
        let deployer = create_test_deployer(mock_server.uri());

        let result = deployer.resolve_target(None, Some(1), None).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_with_secrets_encrypts_against_app_key() {
        let mock_server = MockServer::start().await;
        let (secret, public_hex) = remote_keypair();
        mount_create(&mock_server, &format!("0x{public_hex}")).await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::New {
            teepod_id: 7,
            image: "dstack-0.3.5".into(),
        };
        let request = test_request(vec![SecretEntry::new("API_KEY", "s3cr3t")]);
        let outcome = deployer.deploy(&target, &request).await.unwrap();

        assert_eq!(
            outcome,
            DeploymentOutcome {
                vm_id: "1234".into(),
                vm_name: "my-app".into(),
                status: DeploymentStatus::Success,
                operation: Operation::Create,
            }
        );

        let body = request_body(&mock_server, "POST", "/cvms/from_cvm_configuration").await;
        assert_eq!(body["app_id_salt"], "salt-123");
        assert_eq!(body["teepod_id"], 7);
        assert_eq!(body["image"], "dstack-0.3.5");
        assert_eq!(body["listed"], false);
        assert_eq!(body["compose_manifest"]["manifest_version"], 2);
        assert_eq!(body["compose_manifest"]["public_logs"], false);
        assert_eq!(
            body["compose_manifest"]["docker_compose_file"],
            "services:\n  app:\n    image: org/app:v2\n"
        );

        let encrypted = body["encrypted_env"].as_str().unwrap();
        assert_eq!(
            decrypt_env_vars(secret, encrypted),
            json!({ "env": [{ "key": "API_KEY", "value": "s3cr3t" }] })
        );
    }

    #[tokio::test]
    async fn test_create_without_secrets_omits_encrypted_env() {
        let mock_server = MockServer::start().await;
        let (_, public_hex) = remote_keypair();
        mount_create(&mock_server, &public_hex).await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::New {
            teepod_id: 7,
            image: "dstack-0.3.5".into(),
        };
        deployer.deploy(&target, &test_request(vec![])).await.unwrap();

        let body = request_body(&mock_server, "POST", "/cvms/from_cvm_configuration").await;
        assert!(body.as_object().unwrap().get("encrypted_env").is_none());
        assert_eq!(body["app_id_salt"], "salt-123");
    }

    #[tokio::test]
    async fn test_create_failure_keeps_status_and_body() {
        let mock_server = MockServer::start().await;
        let (_, public_hex) = remote_keypair();

        Mock::given(method("POST"))
            .and(path("/cvms/pubkey/from_cvm_configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "app_env_encrypt_pubkey": public_hex,
                "app_id_salt": "salt-123"
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cvms/from_cvm_configuration"))
            .respond_with(ResponseTemplate::new(422).set_body_string("disk_size too small"))
            .mount(&mock_server)
            .await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::New {
            teepod_id: 7,
            image: "img".into(),
        };
        let err = deployer
            .deploy(&target, &test_request(vec![]))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(422));
        assert!(matches!(err, Error::Remote { body, .. } if body == "disk_size too small"));
    }

    #[tokio::test]
    async fn test_update_preserves_public_logs() {
        let mock_server = MockServer::start().await;
        mount_update(
            &mock_server,
            "vm-42",
            json!({ "env_pubkey": hex::encode([9u8; 32]), "public_logs": true }),
        )
        .await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::Existing {
            vm_id: "vm-42".into(),
        };
        let mut request = test_request(vec![]);
        request.pre_launch_script = Some("#!/bin/sh\necho ready\n".into());
        let outcome = deployer.deploy(&target, &request).await.unwrap();

        assert_eq!(
            outcome,
            DeploymentOutcome {
                vm_id: "vm-42".into(),
                vm_name: "my-app".into(),
                status: DeploymentStatus::Success,
                operation: Operation::Update,
            }
        );

        let body = request_body(&mock_server, "PUT", "/cvms/vm-42/compose").await;
        assert_eq!(
            body,
            json!({
                "compose_manifest": {
                    "name": "my-app",
                    "docker_compose_file": "services:\n  app:\n    image: org/app:v2\n",
                    "public_logs": true,
                    "pre_launch_script": "#!/bin/sh\necho ready\n"
                }
            })
        );
    }

    #[tokio::test]
    async fn test_update_with_secrets_encrypts_against_env_pubkey() {
        let mock_server = MockServer::start().await;
        let (secret, public_hex) = remote_keypair();
        mount_update(&mock_server, "vm-42", json!({ "env_pubkey": public_hex })).await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::Existing {
            vm_id: "vm-42".into(),
        };
        let request = test_request(vec![
            SecretEntry::new("A", "1"),
            SecretEntry::new("C", "3"),
        ]);
        deployer.deploy(&target, &request).await.unwrap();

        let body = request_body(&mock_server, "PUT", "/cvms/vm-42/compose").await;
        assert_eq!(body["compose_manifest"]["public_logs"], false);
        assert_eq!(
            decrypt_env_vars(secret, body["encrypted_env"].as_str().unwrap()),
            json!({ "env": [{ "key": "A", "value": "1" }, { "key": "C", "value": "3" }] })
        );
    }

    #[tokio::test]
    async fn test_update_unknown_vm_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cvms/ghost/compose"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/cvms/ghost/compose"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let deployer = create_test_deployer(mock_server.uri());
        let target = VmTarget::Existing {
            vm_id: "ghost".into(),
        };
        let result = deployer.deploy(&target, &test_request(vec![])).await;

        assert!(matches!(result, Err(Error::NotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_skip_update_makes_no_calls() {
        let mock_server = MockServer::start().await;
        let deployer = create_test_deployer(mock_server.uri()).with_skip_update(true);
        let target = VmTarget::Existing {
            vm_id: "vm-42".into(),
        };

        let outcome = deployer
            .deploy(&target, &test_request(vec![SecretEntry::new("A", "1")]))
            .await
            .unwrap();

        assert_eq!(outcome.status, DeploymentStatus::Skipped);
        assert_eq!(outcome.operation, Operation::Update);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}
