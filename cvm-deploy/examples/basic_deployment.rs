use cvm_deploy::{
    ClientConfig, CvmClient, Deployer, DeploymentRequest, SecretCollector, SecretSource,
    VmResources,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Compose template; ${DOCKER_TAG} is replaced before upload
    let docker_compose = r#"
services:
  app:
    image: my-org/my-app:${DOCKER_TAG}
    environment:
      - API_KEY=${API_KEY}
      - DEBUG=${DEBUG}
    ports:
      - "8080:8080"
"#;

    // Secrets as a secrets manager would export them
    let source = SecretSource::from_json(r#"{"API_KEY": "secret-key", "DEBUG": "true"}"#)?;
    let secrets = SecretCollector::default().collect(&source)?;

    let client = CvmClient::new(ClientConfig::new(std::env::var("PHALA_CLOUD_API_KEY")?))?;
    let deployer = Deployer::new(client);

    let request = DeploymentRequest {
        vm_name: "my-app".to_string(),
        docker_compose: docker_compose.to_string(),
        docker_tag: Some("latest".to_string()),
        pre_launch_script: None,
        resources: VmResources::default(),
        secrets,
    };

    let vm_id = std::env::var("VM_ID").ok();
    let target = deployer
        .resolve_target(vm_id.as_deref(), None, Some("dstack-0.3.5"))
        .await?;
    let outcome = deployer.deploy(&target, &request).await?;

    println!("Deployment finished!");
    println!("Operation: {:?}", outcome.operation);
    println!("VM ID: {}", outcome.vm_id);
    println!("VM name: {}", outcome.vm_name);

    Ok(())
}
