pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::http::StatusCode;
use axum::{extract::State, routing::get, Router};
use monitoring::{FeedMetrics, FEED_METRICS};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|err| {
        error!(event = "metrics_encode_failed", error = %err, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

/// Returns the process-wide feed metrics, registering them on first use.
pub async fn feed_metrics(state: &AppState) -> FeedMetrics {
    FEED_METRICS
        .get_or_init(|| async {
            let mut registry = state.registry.write().await;
            FeedMetrics::register(&mut registry, "feed")
        })
        .await
        .clone()
}

/// Starts the health/metrics HTTP server on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    feed_metrics(&state).await;
    {
        let mut registry = state.registry.write().await;
        monitoring::register_build_info_metric(&mut registry, "dm_sync");
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            error!(event = "metrics_server_failed", error = %err, "metrics server stopped");
        }
    });

    Ok(server_handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[tokio::test]
    async fn serves_health_and_metrics_until_shutdown() {
        let state = Arc::new(AppState::new(CancellationToken::new()));
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = probe.local_addr().expect("addr");
        drop(probe);

        let handle = setup_server_with_addr(state.clone(), addr)
            .await
            .expect("server starts");

        let health = get_path(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"), "{health}");
        assert!(health.ends_with("Healthy"), "{health}");

        feed_metrics(&state).await.pages_loaded_total.inc();
        let metrics = get_path(addr, "/metrics").await;
        assert!(metrics.contains("dm_sync_build_info"), "{metrics}");
        assert!(metrics.contains("feed_pages_loaded_total"), "{metrics}");

        state.shutdown_token.cancel();
        handle.await.expect("server task exits cleanly");
    }
}
