//! Binary entry point.
//!
//! Starts the webhook server and the periodic reconciliation loop on one
//! runtime. `POST /webhook` receives chat updates, `POST /tick` lets an
//! external scheduler (or an operator) force a reconciliation pass.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slotguard::services::reconciler::{self, Services};
use slotguard::services::telegram::Update;
use slotguard::services::{
    BotClient, BotClientConfig, HttpSecretStore, SchoolClient, SchoolClientConfig, TokenVault,
};
use slotguard::{bot, db, AppConfig};

type AppServices = Services<SchoolClient, BotClient, HttpSecretStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotguard=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting slotguard");

    let config = AppConfig::load()?;

    let pool = db::initialize(&config.database_path).await?;
    tracing::info!(path = %config.database_path.display(), "database ready");

    let school = SchoolClient::new(SchoolClientConfig {
        base_url: config.school_base_url.clone(),
        timeout_secs: config.http_timeout_secs,
    })?;

    let chat = BotClient::new(BotClientConfig {
        token: config.bot_token.clone(),
        api_base: config.telegram_api_base.clone(),
        timeout_secs: config.http_timeout_secs,
    })?;

    let secret_store = HttpSecretStore::new(
        &config.secret_store_base_url,
        &config.secret_store_token,
        config.http_timeout_secs,
    )?;
    let vault = TokenVault::new(secret_store, &config.secret_id);

    let services = Services {
        pool,
        school,
        chat,
        vault,
    };

    // Periodic reconciliation, independent of the webhook traffic.
    let tick_services = services.clone();
    let tick_interval = config.tick_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_interval));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(error) = reconciler::run_tick(&tick_services).await {
                tracing::error!(%error, "tick failed");
            }
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/tick", post(tick))
        .with_state(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

/// Chat webhook. Always answers 200 so the transport does not redeliver;
/// failures are logged and, for review flows, retried by the next tick.
async fn webhook(State(services): State<AppServices>, Json(update): Json<Update>) -> StatusCode {
    if let Err(error) = bot::handle_update(&services, &update).await {
        tracing::warn!(update_id = update.update_id, %error, "update failed");
    }
    StatusCode::OK
}

/// Externally triggered reconciliation pass.
async fn tick(State(services): State<AppServices>) -> StatusCode {
    match reconciler::run_tick(&services).await {
        Ok(_) => StatusCode::OK,
        Err(error) => {
            tracing::error!(%error, "tick failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
