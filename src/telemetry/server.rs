//! HTTP pull endpoint and WebSocket push endpoint.
//!
//! Both listeners run on the tokio runtime and shut down gracefully when the shared
//! [`CancellationToken`] fires. `GET /shutdown` on the pull port fires it.

use crate::config::TelemetryConfig;
use crate::telemetry::distributor::{DistributorError, DistributorHandle, Subscription};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONTENT_TYPE,
};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
struct EndpointState {
    handle: DistributorHandle,
    cancel: CancellationToken,
}

fn cors_headers() -> [(HeaderName, &'static str); 4] {
    [
        (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
        (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        (CACHE_CONTROL, "no-store"),
    ]
}

async fn telemetry(State(state): State<EndpointState>) -> Response {
    match state.handle.pull_json() {
        Ok(body) => (
            StatusCode::OK,
            cors_headers(),
            [(CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Pull request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, cors_headers(), e.to_string()).into_response()
        }
    }
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, cors_headers())
}

async fn shutdown(State(state): State<EndpointState>) -> impl IntoResponse {
    info!("Shutdown requested over HTTP");
    state.cancel.cancel();
    (StatusCode::OK, cors_headers(), "Shutting down\n")
}

pub fn pull_router(handle: DistributorHandle, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/", get(telemetry).options(preflight))
        .route("/telemetry", get(telemetry).options(preflight))
        .route("/shutdown", get(shutdown))
        .with_state(EndpointState { handle, cancel })
}

pub fn push_router(handle: DistributorHandle, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(EndpointState { handle, cancel })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<EndpointState>) -> Response {
    match state.handle.subscribe() {
        Ok(subscription) => {
            ws.on_upgrade(move |socket| handle_ws_client(socket, subscription, state.cancel))
        }
        Err(e) => {
            warn!("Rejecting telemetry subscriber: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn handle_ws_client(mut socket: WebSocket, mut subscription: Subscription, cancel: CancellationToken) {
    let id = subscription.id();
    info!("Telemetry subscriber {} connected", id);

    loop {
        tokio::select! {
            msg = subscription.recv() => {
                let Some(text) = msg else {
                    debug!("Subscriber {} closed by distributor", id);
                    break;
                };
                let len = text.len();
                let sent = socket.send(Message::Text(text.as_ref().into())).await;
                subscription.complete(len);
                if sent.is_err() {
                    warn!("{}", DistributorError::SubscriberWrite { id });
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {} // client messages are ignored
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    info!("Telemetry subscriber {} disconnected", id);
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Bound but not yet serving listeners.
pub struct TelemetryServer {
    pull: TcpListener,
    push: TcpListener,
    handle: DistributorHandle,
    cancel: CancellationToken,
}

impl TelemetryServer {
    pub async fn bind(
        config: &TelemetryConfig,
        handle: DistributorHandle,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let pull = bind(SocketAddr::new(config.bind_address, config.http_port)).await?;
        let push = bind(SocketAddr::new(config.bind_address, config.ws_port)).await?;
        Ok(Self {
            pull,
            push,
            handle,
            cancel,
        })
    }

    pub fn pull_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.pull.local_addr()?)
    }

    pub fn push_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.push.local_addr()?)
    }

    /// Serves both endpoints until the token is cancelled.
    pub async fn serve(self) -> Result<(), ServerError> {
        info!("Telemetry pull endpoint on http://{}/telemetry", self.pull_addr()?);
        info!("Telemetry push endpoint on ws://{}/ws", self.push_addr()?);

        let pull = axum::serve(self.pull, pull_router(self.handle.clone(), self.cancel.clone()))
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned());
        let push = axum::serve(self.push, push_router(self.handle, self.cancel.clone()))
            .with_graceful_shutdown(self.cancel.cancelled_owned());

        tokio::try_join!(pull.into_future(), push.into_future())?;
        info!("Telemetry endpoints stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::distributor::{FrameDistributor, JsonFrameEncoder};
    use crate::telemetry::frame::TelemetryFrame;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            ws_port: 0,
            ..Default::default()
        }
    }

    async fn request(addr: SocketAddr, method: &str, path: &str) -> Result<String, Box<dyn std::error::Error>> {
        let mut stream = TcpStream::connect(addr).await?;
        let req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    #[tokio::test]
    async fn pull_endpoint_serves_latest_frame_with_cors() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);
        distributor.publish(Arc::new(TelemetryFrame {
            sequence: 42,
            ..Default::default()
        }))?;

        let cancel = CancellationToken::new();
        let server = TelemetryServer::bind(&config(), handle, cancel.clone()).await?;
        let addr = server.pull_addr()?;
        let task = tokio::spawn(server.serve());

        let response = request(addr, "GET", "/telemetry").await?;
        assert!(response.starts_with("HTTP/1.1 200"));
        let lower = response.to_ascii_lowercase();
        assert!(lower.contains("access-control-allow-origin: *"));
        assert!(lower.contains("cache-control: no-store"));
        assert!(response.contains("\"sequence\":42"));
        assert!(response.contains("\"schemaVersion\":1"));

        let preflight = request(addr, "OPTIONS", "/telemetry").await?;
        assert!(preflight.starts_with("HTTP/1.1 204"));
        assert!(preflight.to_ascii_lowercase().contains("access-control-allow-methods"));

        let shutdown = request(addr, "GET", "/shutdown").await?;
        assert!(shutdown.starts_with("HTTP/1.1 200"));
        assert!(cancel.is_cancelled());
        task.await??;
        Ok(())
    }

    #[tokio::test]
    async fn root_path_is_an_alias_and_batch_ids_increase() -> Result<(), Box<dyn std::error::Error>> {
        let (_distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);
        let cancel = CancellationToken::new();
        let server = TelemetryServer::bind(&config(), handle, cancel.clone()).await?;
        let addr = server.pull_addr()?;
        let task = tokio::spawn(server.serve());

        let first = request(addr, "GET", "/").await?;
        let second = request(addr, "GET", "/telemetry").await?;
        assert!(first.contains("\"batchId\":1"));
        assert!(first.contains("\"frames\":[]"));
        assert!(second.contains("\"batchId\":2"));

        cancel.cancel();
        task.await??;
        Ok(())
    }
}
