pub mod dispatcher;
pub mod events;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let orchestrator = state.orchestrator;

    let (connection_id, mut rx) = orchestrator.connect();
    tracing::info!(%connection_id, "client connected");

    loop {
        tokio::select! {
            // Outgoing notifications for this connection
            Some(msg) = rx.recv() => {
                if ws_sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }
            // Incoming client messages
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for client_msg in events::parse_frame(text.as_str()) {
                            tracing::debug!(%connection_id, ?client_msg, "client message");
                            // Spawned pipelines report back through `rx`.
                            let _ = orchestrator.handle_message(&connection_id, client_msg).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%connection_id, "websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    orchestrator.disconnect(&connection_id).await;
}
