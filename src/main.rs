//! replybot - Entry Point

use std::sync::Arc;

use replybot::{
    AppState, Config, CooldownGate, DeliveryClient, OpenAiGenerator, PacingConfig, QuotaTracker,
    SessionHandle, SessionOrchestrator, Store, XApiClient,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("replybot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    if let Err(e) = config.validate() {
        // The server still comes up for status/history; live runs will fail
        // at the first remote call.
        warn!("Configuration incomplete: {}", e);
    }

    let store = Arc::new(parking_lot::Mutex::new(Store::open(&config.db_path)?));
    {
        let store = store.lock();
        store.cleanup_old(config.history_days)?;
        store.clear_stale_outputs()?;
    }
    info!("Store maintenance complete");

    let remote = Arc::new(XApiClient::new(
        config.x_bearer_token.clone().unwrap_or_default(),
        config.x_access_token.clone().unwrap_or_default(),
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        config.openai_api_key.clone().unwrap_or_default(),
    ));

    let quota = QuotaTracker::new(store.clone(), config.daily_reply_limit);
    let delivery = DeliveryClient::new(remote, CooldownGate::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        delivery,
        generator,
        store.clone(),
        quota,
        PacingConfig::from_config(&config),
    ));

    let state = AppState {
        store,
        orchestrator,
        handle: SessionHandle::new(),
        config,
    };

    replybot::serve(state).await
}
