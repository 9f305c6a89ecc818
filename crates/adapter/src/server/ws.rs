// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection WebSocket handling: the read pump dispatches client
//! requests, the write pump serialises replies and fan-out frames onto the
//! socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command;
use crate::error::ErrorCode;
use crate::registry::RegistryEvent;
use crate::server::auth::{origin_allowed, unauthorized_response, validate_token};
use crate::server::msg::{
    binary_type, decode_binary_frame, named_key_for_sequence, parse_file_upload_payload,
    parse_resize_payload, ClientMessage, ServerMessage, SNAPSHOT_TRIGGER_PAYLOAD,
};
use crate::server::state::Store;
use crate::upload;

const OUTBOX_CAPACITY: usize = 256;
const POST_REDRAW_SETTLE: std::time::Duration = std::time::Duration::from_millis(200);

struct AgentSubscription {
    subscriber_id: crate::pipepane::SubscriberId,
    forward_cancel: CancellationToken,
}

/// Per-client state: subscription tables and the outbound frame queue.
struct ClientRecord {
    id: u64,
    outbox: mpsc::Sender<Message>,
    output_subs: Mutex<HashMap<String, AgentSubscription>>,
    agents_subscribed: AtomicBool,
}

impl ClientRecord {
    async fn send_json(&self, msg: &ServerMessage) {
        let Ok(text) = serde_json::to_string(msg) else {
            warn!("failed to serialise outgoing message");
            return;
        };
        let _ = self.outbox.send(Message::Text(text.into())).await;
    }

    async fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.outbox.send(Message::Binary(bytes.into())).await;
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Rejects the upgrade on origin or token mismatch; the generic
/// [`crate::server::auth::auth_layer`] middleware skips `/ws` since a
/// plain HTTP error response can't be delivered after the socket upgrades.
pub async fn ws_handler(
    State(state): State<Arc<Store>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        let patterns = state.config.allowed_origin_patterns();
        if !origin_allowed(origin, &patterns) {
            return unauthorized_response();
        }
    }

    if validate_token(&headers, query.token.as_deref(), state.config.auth_token.as_deref()).is_err() {
        return unauthorized_response();
    }

    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

async fn handle_connection(state: Arc<Store>, socket: WebSocket) {
    state.lifecycle.ws_client_count.fetch_add(1, Ordering::Relaxed);
    let client_id = state.lifecycle.next_client_id();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);

    let write_pump = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let client = Arc::new(ClientRecord {
        id: client_id,
        outbox: outbox_tx,
        output_subs: Mutex::new(HashMap::new()),
        agents_subscribed: AtomicBool::new(false),
    });

    let mut registry_events = state.registry.subscribe();

    loop {
        tokio::select! {
            _ = state.lifecycle.shutdown.cancelled() => {
                debug!(client_id, "shutting down websocket connection");
                break;
            }
            event = registry_events.recv() => {
                match event {
                    Ok(event) if client.agents_subscribed.load(Ordering::Relaxed) => {
                        let msg = match event {
                            RegistryEvent::Added(agent) => ServerMessage::AgentAdded { agent },
                            RegistryEvent::Removed(name) => ServerMessage::AgentRemoved { name },
                            RegistryEvent::Updated(agent) => ServerMessage::AgentUpdated { agent },
                        };
                        client.send_json(&msg).await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(f)) => f,
                    Some(Err(_)) | None => break,
                };
                match frame {
                    Message::Text(text) => {
                        handle_text_frame(&state, &client, &text).await;
                    }
                    Message::Binary(bytes) => {
                        handle_binary_frame(&state, &client, &bytes).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    cleanup(&state, &client).await;
    write_pump.abort();
    state.lifecycle.ws_client_count.fetch_sub(1, Ordering::Relaxed);
}

async fn cleanup(state: &Store, client: &ClientRecord) {
    let mut subs = client.output_subs.lock().await;
    for (agent, sub) in subs.drain() {
        sub.forward_cancel.cancel();
        state.pipe_panes.unsubscribe(&agent, sub.subscriber_id).await;
    }
}

async fn handle_text_frame(state: &Store, client: &ClientRecord, text: &str) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let request = match parsed {
        Ok(r) => r,
        Err(_) => {
            client
                .send_json(&ServerMessage::Error {
                    id: None,
                    error: ErrorCode::RequestMalformed.to_string(),
                })
                .await;
            return;
        }
    };
    handle_client_message(state, client, request).await;
}

async fn handle_client_message(state: &Store, client: &ClientRecord, msg: ClientMessage) {
    match msg {
        ClientMessage::ListAgents { id } => {
            let agents = state.registry.get_agents().await;
            client
                .send_json(&ServerMessage::ListAgentsResult { id, agents })
                .await;
        }

        ClientMessage::SendPrompt { id, agent, prompt } => {
            let Some(agent_record) = state.registry.get_agent(&agent).await else {
                client
                    .send_json(&ServerMessage::SendPromptResult {
                        id,
                        ok: false,
                        error: Some(ErrorCode::AgentNotFound.to_string()),
                    })
                    .await;
                return;
            };
            match state.prompts.nudge(&agent_record, &prompt).await {
                Ok(()) => {
                    client
                        .send_json(&ServerMessage::SendPromptResult { id, ok: true, error: None })
                        .await;
                }
                Err(e) => {
                    client
                        .send_json(&ServerMessage::SendPromptResult {
                            id,
                            ok: false,
                            error: Some(format!("{e:?}")),
                        })
                        .await;
                }
            }
        }

        ClientMessage::SubscribeOutput { id, agent, stream } => {
            handle_subscribe_output(state, client, id, agent, stream).await;
        }

        ClientMessage::UnsubscribeOutput { id, agent } => {
            let mut subs = client.output_subs.lock().await;
            if let Some(sub) = subs.remove(&agent) {
                sub.forward_cancel.cancel();
                state.pipe_panes.unsubscribe(&agent, sub.subscriber_id).await;
            }
            drop(subs);
            client
                .send_json(&ServerMessage::UnsubscribeOutputResult { id, ok: true })
                .await;
        }

        ClientMessage::SubscribeAgents { id } => {
            client.agents_subscribed.store(true, Ordering::Relaxed);
            let agents = state.registry.get_agents().await;
            client
                .send_json(&ServerMessage::SubscribeAgentsResult { id, ok: true, agents })
                .await;
        }

        ClientMessage::UnsubscribeAgents { id } => {
            client.agents_subscribed.store(false, Ordering::Relaxed);
            client
                .send_json(&ServerMessage::UnsubscribeAgentsResult { id, ok: true })
                .await;
        }
    }
}

async fn handle_subscribe_output(
    state: &Store,
    client: &ClientRecord,
    id: Option<String>,
    agent: String,
    stream: bool,
) {
    if state.registry.get_agent(&agent).await.is_none() {
        client
            .send_json(&ServerMessage::SubscribeOutputResult {
                id,
                ok: false,
                error: Some(ErrorCode::AgentNotFound.to_string()),
                history: None,
            })
            .await;
        return;
    }

    if !stream {
        match command::capture_pane_all(&state.conn, &agent).await {
            Ok(history) => {
                client
                    .send_json(&ServerMessage::SubscribeOutputResult {
                        id,
                        ok: true,
                        error: None,
                        history: Some(history),
                    })
                    .await;
            }
            Err(e) => {
                client
                    .send_json(&ServerMessage::SubscribeOutputResult {
                        id,
                        ok: false,
                        error: Some(e.to_string()),
                        history: None,
                    })
                    .await;
            }
        }
        return;
    }

    // Idempotent: a repeat subscribe for an already-subscribed agent is
    // acknowledged without creating a second fan-out subscription.
    {
        let subs = client.output_subs.lock().await;
        if subs.contains_key(&agent) {
            drop(subs);
            client
                .send_json(&ServerMessage::SubscribeOutputResult {
                    id,
                    ok: true,
                    error: None,
                    history: None,
                })
                .await;
            return;
        }
    }

    let (subscriber_id, mut rx) = match state.pipe_panes.subscribe(&agent).await {
        Ok(v) => v,
        Err(e) => {
            client
                .send_json(&ServerMessage::SubscribeOutputResult {
                    id,
                    ok: false,
                    error: Some(e.to_string()),
                    history: None,
                })
                .await;
            return;
        }
    };

    let forward_cancel = CancellationToken::new();
    client.output_subs.lock().await.insert(
        agent.clone(),
        AgentSubscription {
            subscriber_id,
            forward_cancel: forward_cancel.clone(),
        },
    );

    client
        .send_json(&ServerMessage::SubscribeOutputResult {
            id,
            ok: true,
            error: None,
            history: None,
        })
        .await;

    // Drain anything already buffered so the snapshot below is a known
    // starting point rather than racing with pre-existing chunks.
    while rx.try_recv().is_ok() {}

    let pane_pid = command::list_panes(&state.conn, &agent)
        .await
        .ok()
        .and_then(|panes| panes.into_iter().next())
        .map(|pane| pane.pid);
    if let Err(e) = command::force_redraw(&state.conn, &agent, pane_pid).await {
        warn!(agent, error = %e, "force redraw before snapshot failed");
    }
    tokio::time::sleep(POST_REDRAW_SETTLE).await;
    client
        .send_binary(crate::server::msg::encode_binary_frame(
            binary_type::SNAPSHOT_TRIGGER,
            &agent,
            SNAPSHOT_TRIGGER_PAYLOAD,
        ))
        .await;

    let outbox = client.outbox.clone();
    let forward_agent = agent.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = forward_cancel.cancelled() => break,
                chunk = rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    let frame = crate::server::msg::encode_binary_frame(
                        binary_type::OUTPUT,
                        &forward_agent,
                        &chunk,
                    );
                    if outbox.send(Message::Binary(frame.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

async fn handle_binary_frame(state: &Store, client: &ClientRecord, bytes: &[u8]) {
    let Some(frame) = decode_binary_frame(bytes) else {
        client
            .send_json(&ServerMessage::Error {
                id: None,
                error: ErrorCode::RequestMalformed.to_string(),
            })
            .await;
        return;
    };
    let agent = frame.agent.to_owned();

    match frame.frame_type {
        binary_type::KEYBOARD => handle_keyboard_input(state, &agent, frame.payload).await,
        binary_type::RESIZE => handle_resize_input(state, &agent, frame.payload).await,
        binary_type::FILE_UPLOAD => handle_file_upload(state, client, &agent, frame.payload).await,
        _ => {
            client
                .send_json(&ServerMessage::Error {
                    id: None,
                    error: ErrorCode::RequestMalformed.to_string(),
                })
                .await;
        }
    }
}

async fn handle_keyboard_input(state: &Store, agent: &str, payload: &[u8]) {
    let result = if let Some(key_name) = named_key_for_sequence(payload) {
        command::send_keys_named(&state.conn, agent, key_name).await
    } else {
        command::send_keys_bytes(&state.conn, agent, payload).await
    };
    if let Err(e) = result {
        warn!(agent, error = %e, "keyboard input delivery failed");
    }
}

async fn handle_resize_input(state: &Store, agent: &str, payload: &[u8]) {
    let Some((cols, rows)) = parse_resize_payload(payload) else {
        warn!(agent, "malformed resize payload");
        return;
    };
    if let Err(e) = command::resize_window(&state.conn, agent, cols, rows).await {
        warn!(agent, error = %e, "resize failed");
    }
}

async fn handle_file_upload(state: &Store, client: &ClientRecord, agent: &str, payload: &[u8]) {
    let Some(upload_frame) = parse_file_upload_payload(payload) else {
        client
            .send_json(&ServerMessage::Error {
                id: None,
                error: ErrorCode::RequestMalformed.to_string(),
            })
            .await;
        return;
    };

    let Some(agent_record) = state.registry.get_agent(agent).await else {
        client
            .send_json(&ServerMessage::Error {
                id: None,
                error: ErrorCode::AgentNotFound.to_string(),
            })
            .await;
        return;
    };

    // Serialised against concurrent prompts on the same agent, per the
    // shared per-agent lock.
    let lock = state.prompts.lock_for(agent).await;
    let _guard = lock.lock().await;

    if let Err(e) = upload::handle_upload(
        &state.conn,
        &agent_record,
        upload_frame.file_name,
        upload_frame.mime_type,
        upload_frame.file_bytes,
    )
    .await
    {
        client
            .send_json(&ServerMessage::Error {
                id: None,
                error: e.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
