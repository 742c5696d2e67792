//! WebSocket event stream.
//!
//! A single `/ws` path multiplexes every run: each outgoing frame is one
//! newline-free JSON event carrying its `runId`, and clients filter locally.
//! Slow clients lag the broadcast channel and simply miss events; they never
//! block other subscribers or the pipelines.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

/// GET /ws — upgrade and start streaming.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

/// Forward bus events until the client goes away.
///
/// The stream is one-directional: inbound frames are not read, and a closed
/// peer surfaces as a send error on the next event.
async fn stream_events(mut socket: WebSocket, state: AppState) {
    let mut rx = state.bus.subscribe();
    debug!("websocket subscriber connected");

    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "websocket subscriber lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("websocket subscriber disconnected");
}
