//! Webhook server for the Teams bridge.
//!
//! Graph and the host platform are the in-memory doubles from `mock-bridge`,
//! so the binary exercises the whole notification path against a local
//! SQLite store without external accounts.

use std::sync::Arc;

use activity_handler::{ActivityHandler, Capabilities};
use bridge_core::{GraphClient, TracingMetrics};
use link_store::Store;
use mock_bridge::{MockGraph, MockPlatform, MockUserClientFactory};
use subscription_monitor::Monitor;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webhook_server::{router, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(addr = %config.addr, "Starting webhook server");

    let store = Store::connect(config.store_config()).await?;
    store.migrate().await?;

    let mock_graph = Arc::new(MockGraph::new());
    let graph: Arc<dyn GraphClient> = mock_graph.clone();
    let metrics = Arc::new(TracingMetrics);

    let handler = Arc::new(ActivityHandler::new(
        Capabilities {
            store: store.clone(),
            graph: graph.clone(),
            user_clients: Arc::new(MockUserClientFactory::new(mock_graph)),
            platform: Arc::new(MockPlatform::new()),
            metrics: metrics.clone(),
            content_keys: None,
        },
        config.handler_config(),
    ));
    handler.start()?;

    let monitor = Monitor::new(graph, store.clone(), metrics, config.monitor_config());
    monitor.start()?;

    let app = router()
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(handler.clone()));

    info!(addr = %config.addr, "Webhook server listening");
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.stop().await;
    handler.stop().await;
    store.close().await;
    info!("Webhook server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
