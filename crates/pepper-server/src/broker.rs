//! Relay state owned by the event loop: feature toggles, the latest camera
//! frame and the latest face-detection snapshot.

use axum::body::Bytes;
use pepper_types::{Envelope, FeatureToggles};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Snapshot {
    payload: String,
    received_at: Instant,
}

/// Overwrite-in-place relay state. Nothing here keeps history.
pub struct BrokerState {
    toggles: RwLock<FeatureToggles>,
    latest_frame: RwLock<Option<Bytes>>,
    snapshot: RwLock<Option<Snapshot>>,
    /// `None` keeps snapshots eligible forever.
    snapshot_ttl: Option<Duration>,
    agent_source: String,
}

impl BrokerState {
    pub fn new(snapshot_ttl: Option<Duration>, agent_source: impl Into<String>) -> Self {
        Self {
            toggles: RwLock::new(FeatureToggles::default()),
            latest_frame: RwLock::new(None),
            snapshot: RwLock::new(None),
            snapshot_ttl,
            agent_source: agent_source.into(),
        }
    }

    pub async fn toggles(&self) -> FeatureToggles {
        *self.toggles.read().await
    }

    pub async fn face_detection_enabled(&self) -> bool {
        self.toggles.read().await.face_detection_enabled
    }

    pub async fn set_face_detection(&self, enabled: bool) {
        self.toggles.write().await.face_detection_enabled = enabled;
        tracing::info!(enabled, "face detection toggled");
    }

    pub async fn mic_enabled(&self) -> bool {
        self.toggles.read().await.mic_enabled
    }

    pub async fn set_mic_enabled(&self, enabled: bool) {
        self.toggles.write().await.mic_enabled = enabled;
    }

    pub async fn store_frame(&self, frame: Bytes) {
        *self.latest_frame.write().await = Some(frame);
    }

    pub async fn latest_frame(&self) -> Option<Bytes> {
        self.latest_frame.read().await.clone()
    }

    pub async fn store_snapshot(&self, payload: String) {
        *self.snapshot.write().await = Some(Snapshot {
            payload,
            received_at: Instant::now(),
        });
    }

    /// The latest snapshot, unless it has outlived the configured TTL.
    pub async fn fresh_snapshot(&self) -> Option<String> {
        let snapshot = self.snapshot.read().await;
        let snapshot = snapshot.as_ref()?;
        match self.snapshot_ttl {
            Some(ttl) if snapshot.received_at.elapsed() > ttl => {
                tracing::debug!(
                    age_ms = snapshot.received_at.elapsed().as_millis() as u64,
                    "face detection snapshot is stale"
                );
                None
            }
            _ => Some(snapshot.payload.clone()),
        }
    }

    /// The snapshot to push to viewers right now, if face detection is on.
    pub async fn broadcastable_snapshot(&self) -> Option<String> {
        if !self.face_detection_enabled().await {
            return None;
        }
        self.fresh_snapshot().await
    }

    /// Whether a face-detection message was produced by the robot itself.
    pub fn is_agent_native(&self, envelope: &Envelope) -> bool {
        envelope.str_field("source") == Some(self.agent_source.as_str())
    }
}
