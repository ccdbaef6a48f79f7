//! WebSocket stream of one arena's match events

use super::handlers::AppState;
use crate::events::MatchEvent;
use crate::types::ArenaKey;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /arenas/:arena/events
pub async fn arena_events_handler(
    ws: WebSocketUpgrade,
    Path(arena): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let events = state.events.subscribe();
    let arena = ArenaKey::new(arena);
    ws.on_upgrade(move |socket| forward_events(socket, arena, events))
}

async fn forward_events(
    socket: WebSocket,
    arena: ArenaKey,
    mut events: tokio::sync::broadcast::Receiver<MatchEvent>,
) {
    info!(arena = %arena, "WebSocket client subscribed");
    let (mut sender, mut receiver) = socket.split();

    let client_arena = arena.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(arena = %client_arena, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(arena = %arena, skipped, "WebSocket client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if event.arena != arena {
                continue;
            }

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }
    debug!("WebSocket client disconnected");
}
