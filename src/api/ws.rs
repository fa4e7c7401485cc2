// WebSocket handler for the gateway bridge.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures::{SinkExt, StreamExt};

use super::AppState;
use crate::commands::Bot;
use crate::metrics;
use crate::platform::bridge::{GatewayConnection, GatewayEvent};

/// WebSocket upgrade handler. The bridge must present the bot token as a bearer token.
/// The token is checked before the upgrade itself.
pub async fn ws_gateway(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    State(state): State<AppState>,
) -> Response {
    let authorized = auth
        .map(|TypedHeader(auth)| tokens_match(auth.token(), &state.token))
        .unwrap_or(false);
    if !authorized {
        tracing::warn!("Rejected gateway connection with a bad or missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_ws(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Compare tokens without exiting at the first differing byte. Only the
/// length can leak through timing.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let GatewayConnection { id, mut frames } = state.bridge.connect();
    metrics::GATEWAY_CONNECTIONS.inc();
    tracing::info!(connection = id, "Gateway bridge connected");

    let (mut sink, mut stream) = socket.split();

    // Forward outbound frames until the socket goes away or a newer one takes over.
    let forward = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(result) = stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(connection = id, "Gateway websocket error: {e}");
                break;
            }
        };
        if !state.bridge.is_current(id) {
            tracing::info!(connection = id, "Dropping frames from a superseded gateway socket");
            break;
        }
        match state.bridge.handle_frame(text.as_str()) {
            Ok(Some(event)) => dispatch(state.bot.clone(), event),
            Ok(None) => {}
            Err(e) => tracing::warn!(connection = id, "Ignoring malformed gateway frame: {e}"),
        }
    }

    forward.abort();
    state.bridge.mark_disconnected(id);
    metrics::GATEWAY_CONNECTIONS.dec();
    tracing::info!(connection = id, "Gateway bridge disconnected");
}

/// Handle each event on its own task so a slow store call only stalls that event.
fn dispatch(bot: Arc<Bot>, event: GatewayEvent) {
    tokio::spawn(async move {
        match event {
            GatewayEvent::Ready => bot.on_ready().await,
            GatewayEvent::Message(msg) => bot.handle_message(msg).await,
            GatewayEvent::Command(cmd) => bot.handle_command(cmd).await,
        }
    });
}
