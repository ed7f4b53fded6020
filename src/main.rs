mod api;
mod auth;
mod config;
mod error;
mod models;
mod notify;
mod observability;
mod pricing;
mod state;
mod store;
mod watchdog;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    // Truly unexpected panics in spawned tasks should kill the process and
    // let the supervisor restart it; recovered domain errors never get here.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        tracing::error!("unexpected panic; terminating");
        std::process::exit(1);
    }));

    let sink: Arc<dyn notify::PushSink> = Arc::new(notify::LogSink);
    let shared_state = Arc::new(state::AppState::new(config.clone(), sink));

    let app = api::router(shared_state.clone());

    tokio::spawn(watchdog::run_watchdog(
        shared_state.clone(),
        config.watchdog_interval,
        config.watchdog_threshold,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
