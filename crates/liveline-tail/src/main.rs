mod config;
mod output;

use config::Config;
use liveline_client::LiveClient;
use liveline_types::ConnectionStatus;
use output::LinePrinter;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATUS_TOPICS: [ConnectionStatus; 5] = [
    ConnectionStatus::Connecting,
    ConnectionStatus::Connected,
    ConnectionStatus::Reconnecting,
    ConnectionStatus::Error,
    ConnectionStatus::Disconnected,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting liveline-tail");
    tracing::info!(
        "Server: {} (push: {}, pull: {})",
        config.client.base_url,
        config.client.enable_push,
        config.client.enable_pull
    );

    let client = LiveClient::new(config.client.clone())?;
    let printer = Arc::new(LinePrinter::new(&config.output));

    for topic in config.output.subscriptions() {
        let printer = printer.clone();
        let name = topic.clone();
        client.on(topic, move |payload| printer.print(&name, payload));
    }

    if config.output.status {
        for status in STATUS_TOPICS {
            let printer = printer.clone();
            client.on(status.as_str(), move |payload| printer.print(status.as_str(), payload));
        }
    }

    if !client.connect().await? {
        anyhow::bail!("Could not open a push or pull session");
    }

    let state = client.connection_state();
    tracing::info!(
        "Connected in {} mode (session {})",
        state.mode,
        state.session_id.as_deref().unwrap_or("-")
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    client.disconnect().await;

    let metrics = client.service_metrics();
    tracing::info!(
        requests = metrics.requests_count,
        errors = metrics.error_count,
        avg_response_time_ms = metrics.avg_response_time_ms,
        "Final metrics"
    );

    Ok(())
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries the event lines
    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
