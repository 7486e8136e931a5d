use clap::Parser;
use phala_deploy_action::{run, ActionOutputs, Args};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A local .env file stands in for CI inputs
    if dotenv::dotenv().is_ok() {
        info!("Loaded inputs from .env");
    }

    let args = Args::parse();
    let outputs = ActionOutputs::new(args.github_output.clone());

    let settings = match args.into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid inputs: {e}");
            outputs.set("status", "failed");
            return Err(e.into());
        }
    };

    let outcome = run(&settings, &outputs).await?;
    info!(
        "Deployment finished: {:?} of VM {} ({})",
        outcome.operation, outcome.vm_id, outcome.vm_name
    );

    Ok(())
}
