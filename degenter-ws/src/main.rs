use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    routing::get,
    Router,
};
use degenter_core::{
    broadcaster::{run_trade_pump, Hub},
    config::IndexerConfig,
    db::{create_pool, run_migrations},
};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const KEEPALIVE: Duration = Duration::from_secs(25);

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let conn_id = state.hub.next_conn_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let hello = json!({ "ok": true, "hello": "degenter-ws", "path": "/ws" }).to_string();
    if socket.send(Message::Text(hello)).await.is_err() {
        return;
    }

    // Keepalive: ping every cycle, drop the connection if the previous ping
    // was never answered.
    let mut ping = tokio::time::interval_at(Instant::now() + KEEPALIVE, KEEPALIVE);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_control_frame(&text, conn_id, &state.hub, &tx);
                        if socket.send(Message::Text(response)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if awaiting_pong {
                    tracing::debug!(conn_id, "client missed keepalive, dropping");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    state.hub.drop_conn(conn_id);
    tracing::debug!(conn_id, "ws connection closed");
}

/// Applies one client control frame and returns the JSON reply.
fn handle_control_frame(
    text: &str,
    conn_id: u64,
    hub: &Hub,
    tx: &mpsc::UnboundedSender<String>,
) -> String {
    let Ok(v) = serde_json::from_str::<JsonValue>(text) else {
        return json!({ "ok": false, "error": "invalid_json" }).to_string();
    };

    let op = v.get("op").and_then(|o| o.as_str());
    let topic = v.get("topic").and_then(|t| t.as_str());

    match (op, topic) {
        (Some("subscribe"), Some(topic)) => {
            hub.subscribe(conn_id, topic, tx.clone());
            json!({ "ok": true, "subscribed": topic }).to_string()
        }
        (Some("unsubscribe"), Some(topic)) => {
            hub.unsubscribe(conn_id, topic);
            json!({ "ok": true, "unsubscribed": topic }).to_string()
        }
        (Some("subscribe" | "unsubscribe"), None) => {
            json!({ "ok": false, "error": "missing_topic" }).to_string()
        }
        _ => json!({ "ok": false, "error": "unknown_op" }).to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = IndexerConfig::from_env()?;
    let db = create_pool(&config.db.url, config.db.max_connections).await?;
    run_migrations(&db).await?;

    let hub = Arc::new(Hub::new());
    tokio::spawn(run_trade_pump(db.clone(), Arc::clone(&hub)));

    let state = AppState { hub };
    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.ws.bind_addr.parse()?;
    tracing::info!(%addr, "starting degenter-ws");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
