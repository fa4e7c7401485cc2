// End-to-end gateway tests: the router is served on a local port and a
// websocket client plays the gateway side of the bridge protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use xpbot::api::{router, AppState};
use xpbot::commands::{command_registry, Bot};
use xpbot::cooldown::CooldownTracker;
use xpbot::db::Database;
use xpbot::engine::ProgressionEngine;
use xpbot::platform::bridge::GatewayBridge;
use xpbot::platform::ChatPlatform;
use xpbot::presence::DEFAULT_STATUS;

const TOKEN: &str = "gateway-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (SocketAddr, Arc<Bot>, Arc<GatewayBridge>) {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let bridge = Arc::new(GatewayBridge::default());
    let engine = ProgressionEngine::new(db, CooldownTracker::default());
    let bot = Arc::new(Bot::new(engine, bridge.clone()));
    let state = AppState {
        bot: bot.clone(),
        bridge: bridge.clone(),
        token: Arc::from(TOKEN),
        started_at: Utc::now(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr, bot, bridge)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut request = format!("ws://{addr}/ws/gateway")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {TOKEN}").parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame from the bot, parsed.
async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

/// Nothing but control frames arrives for a short while.
async fn assert_quiet(ws: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(200), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_text() {
                return Some(msg);
            }
        }
        None
    })
    .await;
    if let Ok(Some(msg)) = waited {
        panic!("unexpected frame {msg:?}");
    }
}

fn ready_frame() -> Value {
    json!({
        "op": "ready",
        "bot_user": "XPBot#0001",
        "bot_id": "100",
        "application_id": "200",
        "latency_ms": 42,
        "guild_count": 1,
        "member_count": 3
    })
}

fn ping_frame(id: &str) -> Value {
    json!({
        "op": "command",
        "name": "ping",
        "interaction": {"id": id, "token": "t", "channel_id": "c", "guild_id": "g"},
        "invoker": {"user_id": "u1", "display_name": "Alice"}
    })
}

/// Play the ready handshake: presence, then answer the command sync.
async fn handshake(ws: &mut Client) {
    send(ws, ready_frame()).await;

    let presence = next_frame(ws).await;
    assert_eq!(presence["op"], "set_presence");
    assert_eq!(presence["status"], DEFAULT_STATUS);

    let sync = next_frame(ws).await;
    assert_eq!(sync["op"], "sync_commands");
    let count = sync["commands"].as_array().unwrap().len();
    assert_eq!(count, command_registry().len());
    send(
        ws,
        json!({"op": "sync_result", "request_id": sync["request_id"], "count": count}),
    )
    .await;
}

#[tokio::test]
async fn test_ready_then_command_round_trip() {
    let (addr, _bot, bridge) = serve().await;
    let mut ws = connect(addr).await;

    handshake(&mut ws).await;
    assert!(bridge.session().is_some());

    send(&mut ws, ping_frame("i-1")).await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["op"], "respond");
    assert_eq!(reply["interaction"]["id"], "i-1");
    assert_eq!(reply["content"], "🏓 Pong! Latency: **42 ms**");
    assert_eq!(reply["ephemeral"], false);
    assert_quiet(&mut ws).await;
}

#[tokio::test]
async fn test_messages_over_socket_announce_level_up_once() {
    let (addr, bot, _bridge) = serve().await;
    let mut ws = connect(addr).await;
    handshake(&mut ws).await;

    for _ in 0..10 {
        send(
            &mut ws,
            json!({
                "op": "message",
                "guild_id": "g",
                "channel_id": "general",
                "author": {"user_id": "u1", "display_name": "Alice"}
            }),
        )
        .await;
    }

    let announcement = next_frame(&mut ws).await;
    assert_eq!(announcement["op"], "send_message");
    assert_eq!(announcement["channel_id"], "general");
    assert_eq!(announcement["content"], "🎉 <@u1> reached **level 1**!");
    assert_quiet(&mut ws).await;

    let card = bot.engine().rank("g", "u1").await.unwrap();
    assert_eq!(card.total_xp, 1000);
}

#[tokio::test]
async fn test_reconnect_keeps_one_live_socket() {
    let (addr, _bot, bridge) = serve().await;
    let mut old = connect(addr).await;
    handshake(&mut old).await;

    let mut new = connect(addr).await;

    // The superseded socket is closed by the bot
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match old.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(msg)) if msg.is_text() => panic!("old socket got {msg:?}"),
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "old socket was not closed");
    drop(old);

    // The session reported over the old socket survives its closing
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bridge.session().is_some());

    send(&mut new, ping_frame("i-2")).await;
    let reply = next_frame(&mut new).await;
    assert_eq!(reply["op"], "respond");
    assert_eq!(reply["content"], "🏓 Pong! Latency: **42 ms**");
    assert_quiet(&mut new).await;
}
