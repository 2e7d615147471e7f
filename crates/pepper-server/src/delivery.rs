//! Hands messages produced off the event loop to the Agent's send path.
//!
//! Producers on any thread push JSON text into an unbounded FIFO. A single
//! consumer task on the event loop drains it and forwards each message to the
//! Agent registered at that moment. Delivery is at most once: with no Agent
//! registered the message is dropped, never held for a later Agent.

use crate::registry::{ConnectionRegistry, SendFailure};
use axum::extract::ws::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    active: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
    consumer: Arc<Mutex<Option<JoinHandle<()>>>>,
    poll_interval: Duration,
}

impl DeliveryQueue {
    pub fn new(poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            active: Arc::new(AtomicBool::new(false)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            consumer: Arc::new(Mutex::new(None)),
            poll_interval,
        }
    }

    /// Enqueues a message for the Agent. Safe to call from any thread.
    ///
    /// Without a running consumer no Agent has registered yet (or the queue
    /// was cancelled), so the message is dropped instead of being held.
    pub fn push(&self, message: impl Into<String>) {
        if !self.is_active() {
            tracing::warn!("delivery queue consumer not running, dropping message");
            return;
        }
        if self.tx.send(message.into()).is_err() {
            tracing::error!("delivery queue receiver is gone, message dropped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts the consumer unless one is already running.
    ///
    /// Must be called from within the tokio runtime. Returns true if a new
    /// consumer was spawned.
    pub fn ensure_consumer(&self, registry: ConnectionRegistry) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let Some(rx) = lock(&self.rx).take() else {
            tracing::error!("delivery queue receiver unavailable, consumer not started");
            self.active.store(false, Ordering::SeqCst);
            return false;
        };

        self.cancel_requested.store(false, Ordering::SeqCst);
        let queue = self.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("delivery queue consumer started");
            let rx = queue.drain(rx, registry).await;
            *lock(&queue.rx) = Some(rx);
            queue.active.store(false, Ordering::SeqCst);
            tracing::info!("delivery queue consumer stopped");
        });
        *lock(&self.consumer) = Some(handle);
        true
    }

    /// Asks the consumer to stop and waits for it to finish.
    pub async fn cancel(&self) {
        let handle = lock(&self.consumer).take();
        let Some(handle) = handle else {
            return;
        };
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Err(e) = handle.await {
            tracing::error!("delivery queue consumer failed: {}", e);
            self.active.store(false, Ordering::SeqCst);
        }
    }

    async fn drain(
        &self,
        mut rx: mpsc::UnboundedReceiver<String>,
        registry: ConnectionRegistry,
    ) -> mpsc::UnboundedReceiver<String> {
        loop {
            if self.cancel_requested.swap(false, Ordering::SeqCst) {
                break;
            }
            match rx.try_recv() {
                Ok(message) => deliver(&registry, message).await,
                Err(TryRecvError::Empty) => tokio::time::sleep(self.poll_interval).await,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        rx
    }
}

async fn deliver(registry: &ConnectionRegistry, message: String) {
    match registry.send_to_agent(Message::Text(message.into())).await {
        Ok(()) => tracing::debug!("queued message delivered to agent"),
        Err(SendFailure::NoAgent) => {
            tracing::warn!("no agent connected, dropping queued message");
        }
        Err(e) => tracing::warn!("failed to deliver queued message to agent: {}", e),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
