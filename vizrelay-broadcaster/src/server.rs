//! HTTP + WebSocket surface
//!
//! | Path | Description |
//! |------|-------------|
//! | `/` | WebSocket upgrade, or an HTML status page for plain requests |
//! | `/health` | JSON health check |
//! | `/stats` | JSON relay statistics |
//!
//! Upgrades are accepted on any other path too; plain requests there get 404.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::broadcaster::{RelayHub, RelayStatus};
use crate::client::PeerInfo;
use crate::connection::serve_connection;
use crate::error::Result;

/// Largest message accepted from a peer. Frames are a few hundred bytes.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: usize,
    pub bot_connected: bool,
    /// Seconds since start
    pub uptime: f64,
}

pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .fallback(fallback)
        .with_state(hub)
}

/// Serve the relay on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, hub: Arc<RelayHub>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("🌐 HTTP server: http://{}", addr);
    tracing::info!("🔌 WebSocket: ws://{}", addr);

    axum::serve(
        listener,
        router(hub).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

async fn index(
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(hub): State<Arc<RelayHub>>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, hub, peer_info(addr, &headers)),
        Err(_) => Html(info_page(&hub.status(), &headers, hub.config().classifier.markers()))
            .into_response(),
    }
}

async fn fallback(
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(hub): State<Arc<RelayHub>>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, hub, peer_info(addr, &headers)),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn health(State(hub): State<Arc<RelayHub>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: hub.viewer_count(),
        bot_connected: hub.source_connected(),
        uptime: hub.uptime().as_secs_f64(),
    })
}

async fn stats(State(hub): State<Arc<RelayHub>>) -> Json<RelayStatus> {
    Json(hub.status())
}

fn upgrade(ws: WebSocketUpgrade, hub: Arc<RelayHub>, peer: PeerInfo) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_connection(socket, hub, peer))
}

fn peer_info(addr: SocketAddr, headers: &HeaderMap) -> PeerInfo {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    PeerInfo {
        addr,
        forwarded_for: text(header::HeaderName::from_static("x-forwarded-for")),
        user_agent: text(header::USER_AGENT),
    }
}

fn info_page(status: &RelayStatus, headers: &HeaderMap, markers: &[String]) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(escape_html)
        .unwrap_or_else(|| "this server".to_string());
    let (bot_class, bot_label) = if status.source_connected {
        ("connected", "✅ Connected")
    } else {
        ("disconnected", "❌ Disconnected")
    };
    let marker = markers
        .first()
        .map(|m| escape_html(m))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>🎵 Audio Streaming Relay</title>
  <style>
    body {{ font-family: Arial, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; background: #1a1a1a; color: #fff; }}
    h1 {{ color: #00ff88; }}
    .status {{ background: #2a2a2a; padding: 20px; border-radius: 10px; margin: 20px 0; }}
    .connected {{ color: #00ff88; }}
    .disconnected {{ color: #ff0088; }}
    code {{ background: #000; padding: 2px 5px; border-radius: 3px; }}
  </style>
</head>
<body>
  <h1>🎵 Audio Streaming Relay</h1>
  <div class="status">
    <h2>Status</h2>
    <p>Server: <span class="connected">✅ Running</span></p>
    <p>Bot: <span class="{bot_class}">{bot_label}</span></p>
    <p>Viewers: <strong>{viewers}</strong></p>
    <p>Uptime: <strong>{uptime}s</strong></p>
  </div>
  <div class="status">
    <h2>WebSocket Connection</h2>
    <p>Connect to: <code>ws://{host}</code></p>
    <p>Bot connection: include <code>User-Agent: {marker}/1.0</code></p>
    <p>Viewer connection: any other User-Agent</p>
    <pre><code>{{
  "type": "fft",
  "frequencies": [0-255, ...],
  "timestamp": 1234567890
}}</code></pre>
  </div>
</body>
</html>
"#,
        bot_class = bot_class,
        bot_label = bot_label,
        viewers = status.viewers,
        uptime = status.stats.uptime_secs,
        host = host,
        marker = marker,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
