//! Tracks the single Agent connection and the set of Viewer connections.

use axum::extract::ws::{CloseFrame, Message};
use pepper_types::Role;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Close reason sent to an Agent replaced by a newer connection.
pub const SUPERSEDED_REASON: &str = "superseded by a newer agent connection";

/// Why a message could not be queued for a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    #[error("no agent connected")]
    NoAgent,
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Sending half of one connection's outbound channel.
///
/// The receiving half is drained by that connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub role: Role,
    tx: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn new(role: Role, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            tx,
        }
    }

    /// Queues a message without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), SendFailure> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendFailure> {
        let text: String = text.into();
        self.try_send(Message::Text(text.into()))
    }
}

/// Connection registry shared by every handler.
///
/// At most one Agent reference exists at any instant. Viewers are keyed by
/// connection id, so registering the same connection twice is a no-op.
#[derive(Clone)]
pub struct ConnectionRegistry {
    agent: Arc<RwLock<Option<ConnectionHandle>>>,
    viewers: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
    close_superseded_agent: bool,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectionRegistry {
    pub fn new(close_superseded_agent: bool) -> Self {
        Self {
            agent: Arc::new(RwLock::new(None)),
            viewers: Arc::new(RwLock::new(HashMap::new())),
            close_superseded_agent,
        }
    }

    /// Installs `handle` as the Agent, replacing any existing reference.
    ///
    /// Returns the replaced handle. When configured to, the replaced Agent is
    /// sent a normal close frame after the new reference is in place.
    pub async fn register_agent(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id;
        let previous = self.agent.write().await.replace(handle);

        if let Some(old) = &previous {
            tracing::warn!(
                old_connection_id = %old.id,
                new_connection_id = %new_id,
                "agent connection replaced"
            );
            if self.close_superseded_agent {
                let frame = CloseFrame {
                    code: axum::extract::ws::close_code::NORMAL,
                    reason: SUPERSEDED_REASON.into(),
                };
                if let Err(e) = old.try_send(Message::Close(Some(frame))) {
                    tracing::debug!(connection_id = %old.id, "could not close superseded agent: {}", e);
                }
            }
        }
        previous
    }

    /// Adds a Viewer. Returns false if it was already registered.
    pub async fn register_viewer(&self, handle: ConnectionHandle) -> bool {
        let mut viewers = self.viewers.write().await;
        if viewers.contains_key(&handle.id) {
            return false;
        }
        viewers.insert(handle.id, handle);
        true
    }

    /// Removes a connection by its role.
    ///
    /// For the Agent the reference is cleared only if it still points at
    /// `handle`; a newer Agent that already replaced it stays registered.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        match handle.role {
            Role::Agent => {
                let mut agent = self.agent.write().await;
                match agent.as_ref() {
                    Some(current) if current.id == handle.id => {
                        *agent = None;
                        true
                    }
                    _ => false,
                }
            }
            Role::Viewer => self.viewers.write().await.remove(&handle.id).is_some(),
        }
    }

    pub async fn agent(&self) -> Option<ConnectionHandle> {
        self.agent.read().await.clone()
    }

    pub async fn has_agent(&self) -> bool {
        self.agent.read().await.is_some()
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    /// Queues a message for the current Agent.
    pub async fn send_to_agent(&self, message: Message) -> Result<(), SendFailure> {
        let agent = self.agent().await.ok_or(SendFailure::NoAgent)?;
        agent.try_send(message)
    }

    /// Sends `message` to every current Viewer.
    ///
    /// Each send is isolated: a failed viewer is logged and left out of the
    /// returned id list, and the remaining viewers still receive the message.
    pub async fn broadcast(&self, message: Message) -> Vec<Uuid> {
        let viewers: Vec<ConnectionHandle> = self.viewers.read().await.values().cloned().collect();

        let mut delivered = Vec::with_capacity(viewers.len());
        for viewer in viewers {
            match viewer.try_send(message.clone()) {
                Ok(()) => delivered.push(viewer.id),
                Err(e) => {
                    tracing::warn!(connection_id = %viewer.id, "broadcast to viewer failed: {}", e);
                }
            }
        }
        delivered
    }
}
