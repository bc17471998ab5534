use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use courtside_backend::api::{self, AppState};
use courtside_backend::auth::{temp_tokens, JwtService};
use courtside_backend::config::{Config, LogFormat};
use courtside_backend::database::{PgStore, PoolConfig};
use courtside_backend::email::{LogTransport, MailTransport, ResendTransport};
use courtside_backend::payments::DefaultProviderFactory;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_tracing(config.logging.format);

    tracing::info!("Starting Courtside Backend");
    tracing::info!("Environment: {}", config.server.environment);

    let pool_config = PoolConfig {
        max_connections: config.database.max_connections,
        ..PoolConfig::default()
    };
    let store = Arc::new(
        PgStore::connect(&config.database.url, pool_config)
            .await
            .context("Failed to connect to database")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    let transport: Arc<dyn MailTransport> = match &config.email.resend_api_key {
        Some(key) => Arc::new(ResendTransport::new(key.clone(), Duration::from_secs(30))?),
        None => {
            tracing::warn!("RESEND_API_KEY not set; emails will be logged, not sent");
            Arc::new(LogTransport)
        }
    };
    let factory = Arc::new(DefaultProviderFactory::new(Duration::from_secs(
        config.payments.http_timeout_secs,
    )));
    let jwt = JwtService::new(&config.auth.jwt_secret, config.auth.jwt_expiry_days);

    let state = AppState::new(store, factory, transport, jwt, config.service_settings());
    let _sweeper = state.temp_tokens.clone().spawn_sweeper(temp_tokens::SWEEP_INTERVAL);

    let app = api::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST and PORT must form a valid socket address")?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
