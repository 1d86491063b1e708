//! Controller binary

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use katachi_controller::{controller, ControllerConfig};
use katachi_template::JsonTemplateEvaluator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env();
    info!(system_namespace = %config.system_namespace, "starting katachi controller");

    let client = kube::Client::try_default().await?;
    controller::run(client, config, Arc::new(JsonTemplateEvaluator::new())).await?;
    Ok(())
}
