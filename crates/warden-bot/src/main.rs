use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use moderation::ModerationStore;
use warden_bot::backend::TherapistBackend;
use warden_bot::config::{self, BotConfig};
use warden_bot::gateway::ws::WsGateway;
use warden_bot::gateway::ChatGateway;
use warden_bot::handler::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BotConfig::from_env()?;
    info!(
        gateway = %config.gateway.url,
        llm = %config.llm.url,
        model = %config.llm.model,
        "Warden bot starting"
    );

    if !config::check_endpoint(&config.llm.url).await {
        warn!(url = %config.llm.url, "Language backend not reachable at startup");
    }

    let backend = TherapistBackend::new(&config.llm)?;
    let (gateway, mut events) =
        WsGateway::connect(&config.gateway.url, &config.gateway.token).await?;

    match gateway.register_command("ping", "Check latency").await {
        Ok(()) => info!("Slash command /ping registered"),
        Err(e) => warn!(error = %e, "Failed to register slash command"),
    }

    let handler = Arc::new(EventHandler::new(
        Arc::new(gateway),
        Arc::new(backend),
        Arc::new(ModerationStore::new()),
    ));

    // One task per event: handlers for different messages interleave at
    // their await points.
    while let Some(event) = events.recv().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle_event(event).await;
        });
    }

    info!("Gateway event stream ended, shutting down");
    Ok(())
}
