//! Per-client duplex adapter. Grounded on `server/handler.go`'s single
//! read loop, split into cooperating reader/writer tasks per the
//! concurrency model: the writer drains the Bus subscription and forwards
//! frames verbatim, skipping the subscriber's own echo the same way
//! `broadcast()`'s `if client != sender` does in the Go original; the
//! reader owns the socket, enforces scope, and calls into the Engine.
//! `workspace_id` is always taken from the route, never from the client
//! payload — "Force security" in the Go original's comment on the same
//! line.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value as Json;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::auth::Principal;
use crate::engine::{Engine, Operation};
use crate::presence::{PresenceEntry, PresenceManager};
use crate::value::Value;
use crate::webhook::WebhookDispatcher;

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    payload: Json,
}

#[derive(Debug, Deserialize)]
struct OpPayload {
    key: String,
    value: Value,
    #[serde(default)]
    timestamp: i64,
}

pub struct SessionContext {
    pub engine: Arc<Engine>,
    pub presence: Arc<PresenceManager>,
    pub webhook: Arc<WebhookDispatcher>,
    pub workspace_id: String,
    pub principal: Principal,
}

/// Returns the session id assigned at upgrade, for the caller to surface
/// in the `X-Session-Id` response header before completing the upgrade.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Drives one client connection from SNAPSHOT through CLOSED. Returns
/// once the transport closes or errors; all cleanup (unsubscribe,
/// presence removal, webhook notification) happens before returning.
pub async fn run<S>(ws: tokio_tungstenite::WebSocketStream<S>, ctx: SessionContext, session_id: String)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    ctx.presence.add_user(
        &ctx.workspace_id,
        PresenceEntry {
            user_id: ctx.principal.user_id.clone(),
            status: "online".to_string(),
        },
    );

    let (mut bus_rx, bus_sub) = ctx.engine.bus().subscribe(&ctx.workspace_id);

    if let Ok(snapshot) = ctx.engine.get_full_state(&ctx.workspace_id) {
        let frame = serde_json::json!({
            "type": "init",
            "data": snapshot.data,
            "heads": snapshot.heads,
        });
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = sink.send(WsMessage::Text(text)).await;
        }
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = handle_client_frame(&ctx, &text).await {
                            if sink.send(WsMessage::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            outgoing = bus_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if msg.sender_id.as_deref() == Some(ctx.principal.user_id.as_str()) {
                            continue;
                        }
                        if let Ok(text) = String::from_utf8(msg.payload) {
                            if sink.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    ctx.engine.bus().unsubscribe(&bus_sub);
    ctx.presence.remove_user(&ctx.workspace_id, &ctx.principal.user_id);
    ctx.webhook.dispatch(
        "client.disconnected",
        serde_json::json!({
            "session_id": session_id,
            "workspace_id": ctx.workspace_id,
            "user_id": ctx.principal.user_id,
        }),
    );
}

/// Returns `Some(reply_frame_json)` when the reader owes the client an
/// immediate reply (currently only `permission_denied`); successful `op`
/// frames are echoed via the Bus, not a direct reply.
async fn handle_client_frame(ctx: &SessionContext, text: &str) -> Option<String> {
    let raw: ClientFrame = serde_json::from_str(text).ok()?;
    if raw.frame_type != "op" {
        return None;
    }

    let op_payload: OpPayload = serde_json::from_value(raw.payload.clone()).ok()?;

    if !ctx.principal.can_write() {
        let error_frame = serde_json::json!({
            "type": "error",
            "payload": "permission_denied: missing 'write' scope",
        });
        return serde_json::to_string(&error_frame).ok();
    }

    let op = Operation {
        workspace_id: ctx.workspace_id.clone(),
        key: op_payload.key,
        value: op_payload.value,
        timestamp_us: op_payload.timestamp,
    };

    match ctx.engine.process_operation(op).await {
        Ok(()) => {
            let echo = serde_json::json!({ "type": "op", "payload": raw.payload });
            ctx.engine.publish_frame(
                &ctx.workspace_id,
                serde_json::to_vec(&echo).unwrap_or_default(),
                Some(ctx.principal.user_id.clone()),
            );
            None
        }
        Err(e) => {
            let error_frame = serde_json::json!({ "type": "error", "payload": e.to_string() });
            serde_json::to_string(&error_frame).ok()
        }
    }
}
