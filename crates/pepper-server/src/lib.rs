//! Pepper relay server library logic.
//!
//! One listener serves the WebSocket transport for the robot (Agent) and its
//! viewers, plus a small HTTP control surface for speech submission and the
//! microphone toggle.

pub mod api;
pub mod api_speech;
pub mod api_ws;
pub mod broker;
pub mod config;
pub mod delivery;
pub mod mic;
pub mod registry;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Extension, Router,
};
use broker::BrokerState;
use config::Config;
use delivery::DeliveryQueue;
use pepper_voice::{AudioSourceFactory, CaptureLoop, SpeechPipeline, VoiceError};
use registry::ConnectionRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum upload size for `/api/speech` (25 MiB).
const MAX_AUDIO_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across all request handlers.
pub struct AppState {
    /// The Agent reference and the Viewer set.
    pub registry: ConnectionRegistry,
    /// Toggles, latest frame and latest snapshot.
    pub broker: BrokerState,
    /// Hand-off from off-loop producers to the Agent.
    pub queue: DeliveryQueue,
    pub pipeline: Arc<SpeechPipeline>,
    pub capture: Arc<CaptureLoop>,
    /// Capacity of each connection's outbound channel.
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(config: &Config, pipeline: SpeechPipeline, audio: AudioSourceFactory) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.broker.close_superseded_agent),
            broker: BrokerState::new(config.broker.snapshot_ttl(), &config.broker.agent_source),
            queue: DeliveryQueue::new(config.broker.queue_poll_interval()),
            pipeline: Arc::new(pipeline),
            capture: Arc::new(CaptureLoop::new(audio, config.capture.clone())),
            outbound_buffer: config.broker.outbound_buffer.max(1),
        }
    }

    /// Builds the state with the default capabilities and audio source.
    pub fn from_config(config: &Config) -> Result<Self, VoiceError> {
        let pipeline = SpeechPipeline::from_config(&config.speech)?;
        Ok(Self::new(config, pipeline, default_audio_source(config)))
    }

    /// Stops background work: the capture loop and the delivery consumer.
    pub async fn shutdown(&self) {
        let capture = self.capture.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
            tracing::error!("failed to stop capture loop: {}", e);
        }
        self.queue.cancel().await;
    }
}

#[cfg(feature = "cpal-audio")]
fn default_audio_source(config: &Config) -> AudioSourceFactory {
    pepper_voice::CpalAudioSource::factory(&config.capture)
}

#[cfg(not(feature = "cpal-audio"))]
fn default_audio_source(config: &Config) -> AudioSourceFactory {
    pepper_voice::CommandAudioSource::factory(&config.capture)
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let speech_routes = Router::new()
        .route("/api/speech", post(api_speech::speech_handler))
        .layer(DefaultBodyLimit::max(MAX_AUDIO_UPLOAD_BYTES));

    Router::new()
        .route("/health", get(api::health))
        .route("/api/receive", post(api_speech::receive_handler))
        .route("/api/toggle_mic", post(api_speech::toggle_mic_handler))
        .merge(speech_routes)
        .route("/", any(api_ws::ws_handler))
        .route("/pepper", any(api_ws::ws_handler))
        .fallback(api_ws::ws_handler)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}
