//! Sandbox orchestrator server.
//!
//! Accepts coding jobs over HTTP and runs each one in an isolated workspace.

use std::sync::Arc;

use sandbox_orchestrator::api::{router, AppState};
use sandbox_orchestrator::config::{OrchestratorConfig, Validate};
use sandbox_orchestrator::reasoning::{ReasoningService, ResponsesClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "orchestrator stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::load()?;
    for warning in config.validate().into_result()? {
        tracing::warn!("{}", warning);
    }

    let service: Option<Arc<dyn ReasoningService>> = config.agent.api_key.as_ref().map(|key| {
        tracing::info!(model = %config.agent.model, "using responses API");
        Arc::new(ResponsesClient::new(
            key.clone(),
            config.agent.base_url.clone(),
            config.agent.model.clone(),
        )) as Arc<dyn ReasoningService>
    });

    let state = AppState::from_config(&config, service);

    let registry = Arc::clone(&state.registry);
    let sweep_interval = config.jobs.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            registry.evict_expired().await;
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
