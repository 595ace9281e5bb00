mod routes;
mod singleton;
mod state;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use shiftmirror_core::config::MirrorConfig;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = MirrorConfig::load()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let lock = singleton::lock_data_dir(&config.data_path())?;
    tracing::info!(lock = %lock.path().display(), "Holding store lock");

    let state = AppState::from_config(&config).await?;
    spawn_change_logger(&state);
    state.scheduler.start().await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router()
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("shiftmirror-server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.scheduler.stop().await;
    Ok(())
}

/// Log every change notification until the channel closes.
fn spawn_change_logger(state: &AppState) {
    let mut rx = state.notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::debug!(
                    kind = ?event.kind,
                    calendar_id = %event.calendar_id,
                    payload = %event.payload,
                    "Shifts changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Change logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
