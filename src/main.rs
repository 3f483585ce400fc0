//! CSV Agent - HTTP Server Entry Point

use csv_agent::{api, config::Config, llm};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csv_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: planner={} model={}",
        config.planner,
        config.model_label()
    );

    // A failed pull is not fatal: the model may already be present.
    if let Some(model) = config.model.as_ref().filter(|m| m.pull_on_start) {
        info!("Pulling model {} from {}", model.model, model.base_url);
        match llm::pull_model(&model.base_url, &model.model).await {
            Ok(()) => info!("Model {} is ready", model.model),
            Err(e) => warn!("Could not pull model {}: {}", model.model, e),
        }
    }

    api::serve(config).await
}
