use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use booking_assist::booking::{BookingScene, BookingService, SessionStore, spawn_expiry_task};
use booking_assist::bot::{Dispatcher, MenuHandler, UpdateHandler};
use booking_assist::channels::{ChannelManager, CliChannel, TelegramChannel};
use booking_assist::config::AppConfig;
use booking_assist::provider::YclientsClient;
use booking_assist::routes::api_routes;
use booking_assist::store::LibSqlBackend;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console logging plus, when a directory is configured, a daily log file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "booking-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export YCLIENTS_PARTNER_TOKEN=... YCLIENTS_COMPANY_ID=...");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📅 Booking Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", config.provider.base_url);
    eprintln!("   Company: {} ({})", config.booking.company_id, config.booking.branch_name);
    eprintln!("   REST API: http://0.0.0.0:{}/api/health", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.database_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.database_path.display());

    // ── Booking core ─────────────────────────────────────────────────────
    let provider = Arc::new(YclientsClient::new(&config.provider)?);
    let bookings = Arc::new(BookingService::new(
        provider,
        db.clone(),
        config.booking.clone(),
    ));

    // ── REST server ──────────────────────────────────────────────────────
    let app = api_routes(db.clone(), bookings.clone());
    let http_port = config.http_port;
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await {
            Ok(listener) => {
                tracing::info!(port = http_port, "REST server started");
                axum::serve(listener, app).await.ok();
            }
            Err(e) => tracing::error!(port = http_port, error = %e, "Failed to bind REST port"),
        }
    });

    // ── Sessions ─────────────────────────────────────────────────────────
    let sessions = SessionStore::new();
    let sweep_handle = spawn_expiry_task(
        sessions.clone(),
        config.session_idle_timeout,
        Duration::from_secs(60),
    );

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    match &config.telegram {
        Some(telegram) => {
            eprintln!(
                "   Telegram: enabled (allowed: {})",
                if telegram.allowed_users.iter().any(|u| u == "*") {
                    "everyone".to_string()
                } else {
                    telegram.allowed_users.join(", ")
                }
            );
            channels.add(Box::new(TelegramChannel::new(
                telegram.bot_token.clone(),
                telegram.allowed_users.clone(),
            )));
        }
        None => {
            eprintln!("   Telegram: disabled, using the terminal");
            eprintln!("   Type /book to start. Press buttons with !action, e.g. !service_1\n");
            channels.add(Box::new(CliChannel::new()));
        }
    }
    let channels = Arc::new(channels);

    if let Err(e) = channels.health_check_all().await {
        tracing::warn!(error = %e, "Channel health check failed");
    }
    let updates = channels.start_all().await?;

    let handler = Arc::new(UpdateHandler::new(
        db.clone(),
        BookingScene::new(bookings.clone(), db.clone()),
        MenuHandler::new(bookings),
        sessions,
        channels.clone(),
    ));

    tokio::select! {
        _ = Dispatcher::new(handler).run(updates) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down...");
        }
    }

    sweep_handle.abort();
    channels.shutdown_all().await?;

    Ok(())
}
