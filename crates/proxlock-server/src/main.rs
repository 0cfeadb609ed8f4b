//! # proxlockd
//!
//! Daemon that follows one Bluetooth device and requests a screen lock when
//! it walks away.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package proxlock-server
//!
//! # With an explicit settings file and JSON file logs
//! PROXLOCK_CONFIG=~/.config/proxlock/config.toml PROXLOCK_ENV=production proxlockd
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context as _;
use proxlock_server::api::create_router;
use proxlock_server::logging;
use proxlock_server::settings::Settings;
use proxlock_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting proxlockd");

    let settings = Settings::from_env().context("loading settings")?;
    let addr = settings.listen_addr()?;

    let state = AppState::new(settings);
    state.start_if_configured().await;

    let app = create_router(state.clone());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Err(err) = state.monitor().stop().await {
        error!(error = %err, "Monitor did not stop cleanly");
    }

    Ok(())
}

/// Resolves on ctrl-c or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
