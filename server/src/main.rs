use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use waveroom_server::protocol::{ClientMessage, ServerMessage};
use waveroom_server::state::ServerState;
use waveroom_server::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveroom_server=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3005);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let state = ServerState::new(Arc::new(MemoryStore::new()));

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(ws_endpoint))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Waveroom server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn handle_connection(socket: WebSocket, state: ServerState) {
    let client_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    state.register_client(client_id, tx);

    // Send pump: everything the engine emits for this connection.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("failed to serialize message: {}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(AxumWsMessage::Text(json)).await {
                tracing::error!("failed to send message: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                if let Err(e) = handle_message(&text, client_id, &state).await {
                    tracing::error!("error handling message from {}: {}", client_id, e);
                    state.unicast(client_id, ServerMessage::server_error(e.to_string()));
                }
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::info!("client {} closing connection", client_id);
                break;
            }
            Err(e) => {
                tracing::error!("websocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.remove_client(client_id).await;
    send_task.abort();
}

async fn handle_message(text: &str, client_id: Uuid, state: &ServerState) -> anyhow::Result<()> {
    let msg: ClientMessage = serde_json::from_str(text)?;
    state.dispatch(client_id, msg).await?;
    Ok(())
}
