use dotenv::dotenv;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();

    // --- Tracing ---
    let app_level = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let global_filter = Targets::new()
        .with_default(LevelFilter::WARN)
        .with_target("be_", app_level)
        .with_target("auth_core", app_level)
        .with_target("casbin", LevelFilter::INFO)
        .with_target("hyper", LevelFilter::OFF)
        .with_target("tokio", LevelFilter::OFF);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(global_filter)
        .try_init()
        .unwrap();

    // --- Shutdown channel ---
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        tracing::info!("Received CTRL+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    });

    // --- Gateway config from environment ---
    let config = be_auth_gateway::GatewayConfig::from_env()
        .expect("Invalid gateway configuration");

    be_auth_gateway::run_server(config, shutdown_rx).await
}
