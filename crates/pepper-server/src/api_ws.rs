//! WebSocket transport: role classification, per-connection read/write loops
//! and the message dispatch table.
//!
//! Every connection gets a bounded outbound channel drained by its own writer
//! task, so a slow or dead peer only ever affects itself. Whatever ends the
//! read loop (a close frame, a transport error or a writer failure) the
//! connection is removed from the registry before the handler returns.

use crate::registry::{ConnectionHandle, ConnectionRegistry, SendFailure};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, Uri},
    response::IntoResponse,
    Extension,
};
use futures_util::{
    stream::{SplitStream, StreamExt},
    SinkExt,
};
use pepper_types::{
    Envelope, FaceDetectionAck, MessageKind, Role, SayCommand, AGENT_SUBPROTOCOL, PONG,
};
use pepper_voice::{PipelineTask, TaskOrigin};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a connection's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Close frame with code 1000/1001, or without a status code.
    ClosedNormal,
    /// Any other close code, or a stream that ended without a closing handshake.
    ClosedAbnormal { code: u16, reason: String },
    /// The connection failed on our side.
    Fault(String),
}

impl ConnectionEnd {
    fn from_close(frame: Option<CloseFrame>) -> Self {
        match frame {
            None => Self::ClosedNormal,
            Some(frame) if matches!(frame.code, close_code::NORMAL | close_code::AWAY) => {
                Self::ClosedNormal
            }
            Some(frame) => Self::ClosedAbnormal {
                code: frame.code,
                reason: frame.reason.to_string(),
            },
        }
    }
}

/// WebSocket entry point for every path not claimed by the HTTP surface.
///
/// `/pepper` is the Agent; the `pepper` sub-protocol is offered back so robot
/// clients that negotiate it complete the handshake.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let offered: Vec<&str> = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect();
    let role = Role::classify(Some(uri.path()), &offered);

    ws.protocols([AGENT_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state, role, remote_addr))
}

/// Removes a connection from the registry even if its handler unwinds.
struct Registration {
    registry: ConnectionRegistry,
    handle: Option<ConnectionHandle>,
}

impl Registration {
    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.registry.unregister(&handle).await;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let registry = self.registry.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    registry.unregister(&handle).await;
                });
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, role: Role, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.outbound_buffer);
    let handle = ConnectionHandle::new(role, tx);
    let connection_id = handle.id;

    tracing::info!(%connection_id, %role, %remote_addr, "connection opened");

    // Forward queued messages to the socket until every sender is gone or a
    // write fails.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let registration = Registration {
        registry: state.registry.clone(),
        handle: Some(handle.clone()),
    };
    match role {
        Role::Agent => {
            state.registry.register_agent(handle.clone()).await;
            state.queue.ensure_consumer(state.registry.clone());
        }
        Role::Viewer => {
            state.registry.register_viewer(handle.clone()).await;
            if let Some(frame) = state.broker.latest_frame().await {
                send_or_log(&handle, Message::Binary(frame));
            }
        }
    }

    let end = tokio::select! {
        end = read_loop(&state, &handle, &mut receiver) => end,
        result = &mut send_task => match result {
            Ok(()) => ConnectionEnd::Fault("failed to write to connection".to_string()),
            Err(e) => ConnectionEnd::Fault(format!("writer task failed: {}", e)),
        },
    };

    match &end {
        ConnectionEnd::ClosedNormal => {
            tracing::info!(%connection_id, %role, "connection closed gracefully");
        }
        ConnectionEnd::ClosedAbnormal { code, reason } => {
            tracing::warn!(%connection_id, %role, code, reason = %reason, "connection closed with error");
        }
        ConnectionEnd::Fault(error) => {
            tracing::error!(%connection_id, %role, error = %error, "connection failed");
        }
    }

    registration.release().await;
    send_task.abort();
    tracing::info!(%connection_id, %role, "connection unregistered");
}

async fn read_loop(
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    receiver: &mut SplitStream<WebSocket>,
) -> ConnectionEnd {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => dispatch_text(state, handle, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => dispatch_binary(state, handle, data).await,
            Some(Ok(Message::Close(frame))) => return ConnectionEnd::from_close(frame),
            // Pings are answered by the transport.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                return ConnectionEnd::ClosedAbnormal {
                    code: close_code::ABNORMAL,
                    reason: e.to_string(),
                }
            }
            None => {
                return ConnectionEnd::ClosedAbnormal {
                    code: close_code::ABNORMAL,
                    reason: "stream ended without a close frame".to_string(),
                }
            }
        }
    }
}

async fn dispatch_text(state: &Arc<AppState>, handle: &ConnectionHandle, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(connection_id = %handle.id, role = %handle.role, "dropping malformed message: {}", e);
            return;
        }
    };

    match handle.role {
        Role::Agent => agent_message(state, handle, envelope).await,
        Role::Viewer => viewer_message(state, handle, envelope).await,
    }
}

async fn dispatch_binary(state: &Arc<AppState>, handle: &ConnectionHandle, data: Bytes) {
    match handle.role {
        Role::Agent => relay_frame(state, data).await,
        Role::Viewer => spawn_viewer_clip(state, handle, data),
    }
}

/// Camera frame from the Agent: store, fan out, then follow with the
/// snapshot so viewers always see the frame first.
async fn relay_frame(state: &Arc<AppState>, frame: Bytes) {
    state.broker.store_frame(frame.clone()).await;
    state.registry.broadcast(Message::Binary(frame)).await;

    if let Some(snapshot) = state.broker.broadcastable_snapshot().await {
        state.registry.broadcast(Message::Text(snapshot.into())).await;
    }
}

async fn agent_message(state: &Arc<AppState>, handle: &ConnectionHandle, envelope: Envelope) {
    match &envelope.kind {
        MessageKind::FaceDetection => {
            if !state.broker.is_agent_native(&envelope) {
                tracing::debug!(source = ?envelope.str_field("source"), "ignoring face detection from another source");
                return;
            }
            state.broker.store_snapshot(envelope.raw.clone()).await;
            if state.broker.face_detection_enabled().await {
                state.registry.broadcast(Message::Text(envelope.raw.into())).await;
            }
        }
        MessageKind::Speech if envelope.action() == Some("recognized") => {
            match envelope.str_field("text").map(str::trim).filter(|t| !t.is_empty()) {
                Some(text) => spawn_agent_reply(state, text.to_string()),
                None => tracing::warn!("recognized speech without text"),
            }
        }
        MessageKind::Ping => send_or_log(handle, Message::Text(PONG.into())),
        MessageKind::Status => {
            tracing::info!(body = %envelope.body, "agent status");
        }
        other => {
            tracing::debug!(kind = other.as_str(), body = %envelope.body, "agent message");
        }
    }
}

/// Speech recognized on the robot: generate a short reply and say it.
fn spawn_agent_reply(state: &Arc<AppState>, text: String) {
    let state = state.clone();
    tokio::spawn(async move {
        tracing::info!(text = %text, "speech recognized by agent");
        match state.pipeline.respond(&text, true).await {
            Ok(reply) => {
                let say = SayCommand::new(reply).to_json();
                if let Err(e) = state.registry.send_to_agent(Message::Text(say.into())).await {
                    tracing::warn!("could not send reply to agent: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to generate reply: {}", e),
        }
    });
}

async fn viewer_message(state: &Arc<AppState>, handle: &ConnectionHandle, envelope: Envelope) {
    tracing::info!(connection_id = %handle.id, kind = envelope.kind.as_str(), "viewer command");

    match &envelope.kind {
        MessageKind::FaceDetection if matches!(envelope.action(), Some("enable" | "disable")) => {
            let enabled = envelope.action() == Some("enable");
            state.broker.set_face_detection(enabled).await;
            send_or_log(handle, Message::Text(FaceDetectionAck::new(enabled).to_json().into()));

            if state.registry.has_agent().await {
                forward_to_agent(state, &envelope).await;
            }

            if enabled {
                if let Some(snapshot) = state.broker.fresh_snapshot().await {
                    send_or_log(handle, Message::Text(snapshot.into()));
                }
            }
        }
        MessageKind::Other(kind) => {
            tracing::debug!(kind = %kind, "ignoring unrecognized viewer message");
        }
        _ => forward_to_agent(state, &envelope).await,
    }
}

async fn forward_to_agent(state: &Arc<AppState>, envelope: &Envelope) {
    match state
        .registry
        .send_to_agent(Message::Text(envelope.raw.clone().into()))
        .await
    {
        Ok(()) => {}
        Err(SendFailure::NoAgent) => {
            tracing::warn!(kind = envelope.kind.as_str(), "cannot forward command: Pepper not connected");
        }
        Err(e) => tracing::warn!(kind = envelope.kind.as_str(), "failed to forward command: {}", e),
    }
}

/// Audio clip from a Viewer: run the pipeline off the read loop and report
/// back to that viewer only.
fn spawn_viewer_clip(state: &Arc<AppState>, handle: &ConnectionHandle, clip: Bytes) {
    let state = state.clone();
    let handle = handle.clone();
    tokio::spawn(async move {
        let outcome = state
            .pipeline
            .process(PipelineTask::new(clip.to_vec(), TaskOrigin::Viewer(handle.id)))
            .await;

        send_or_log(&handle, Message::Text(outcome.to_json().into()));

        if let Some(reply) = outcome.response() {
            let say = SayCommand::new(reply).to_json();
            if let Err(e) = state.registry.send_to_agent(Message::Text(say.into())).await {
                tracing::warn!("could not forward reply to agent: {}", e);
            }
        }
    });
}

fn send_or_log(handle: &ConnectionHandle, message: Message) {
    if let Err(e) = handle.try_send(message) {
        tracing::warn!(connection_id = %handle.id, role = %handle.role, "failed to send message: {}", e);
    }
}
