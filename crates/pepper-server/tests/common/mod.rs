// Shared fixtures for the relay integration tests: mock speech capabilities,
// a mock language-model server, a mock microphone and WebSocket helpers.

#![allow(dead_code)]

use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use pepper_server::config::Config;
use pepper_server::{app, AppState};
use pepper_voice::{
    wav, AudioSource, AudioSourceFactory, ContainerNormalizer, LanguageModelClient,
    SpeechPipeline, Transcriber, VoiceActivityDetector, VoiceError,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const LLM_REPLY: &str = "Hello from the relay.";
pub const TRANSCRIPT: &str = "hello robot";

struct AlwaysSpeech;

impl VoiceActivityDetector for AlwaysSpeech {
    fn speech_seconds(&self, _wav_path: &Path) -> Result<f32, VoiceError> {
        Ok(2.0)
    }
}

struct FixedTranscriber;

impl Transcriber for FixedTranscriber {
    fn transcribe(&self, _wav_path: &Path) -> Result<String, VoiceError> {
        Ok(TRANSCRIPT.to_string())
    }
}

/// Starts a mock `/api/generate` endpoint and returns its URL.
pub async fn spawn_llm() -> String {
    let app = Router::new().route(
        "/api/generate",
        post(|Json(_body): Json<Value>| async { Json(json!({ "response": LLM_REPLY })) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/generate", addr)
}

pub fn pipeline(llm_url: &str) -> SpeechPipeline {
    SpeechPipeline::new(
        Arc::new(ContainerNormalizer::new("ffmpeg")),
        Some(Arc::new(AlwaysSpeech) as Arc<dyn VoiceActivityDetector>),
        Some(Arc::new(FixedTranscriber) as Arc<dyn Transcriber>),
        LanguageModelClient::new(llm_url, "test-model", 100, Duration::from_secs(5)).unwrap(),
    )
}

#[derive(Default)]
pub struct MicCounters {
    pub opened: AtomicUsize,
    pub stopped: AtomicUsize,
}

struct SilentMic {
    counters: Arc<MicCounters>,
}

impl AudioSource for SilentMic {
    fn start(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>, VoiceError> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(vec![0; 160])
    }

    fn stop(&mut self) -> Result<(), VoiceError> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn mic(counters: Arc<MicCounters>) -> AudioSourceFactory {
    Arc::new(move || {
        counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SilentMic {
            counters: counters.clone(),
        }) as Box<dyn AudioSource>)
    })
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.broker.queue_poll_ms = 10;
    config.capture.sample_rate = 1600;
    config.capture.chunk_samples = 160;
    config.capture.window_secs = 60;
    config
}

/// State wired to mocks: every pipeline run yields [`TRANSCRIPT`] and [`LLM_REPLY`].
pub async fn test_state(config: &Config) -> (Arc<AppState>, Arc<MicCounters>) {
    let llm_url = spawn_llm().await;
    let counters = Arc::new(MicCounters::default());
    let state = AppState::new(config, pipeline(&llm_url), mic(counters.clone()));
    (Arc::new(state), counters)
}

/// Serves the relay on an ephemeral port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .expect("failed to connect");
    client
}

/// Connects the robot and waits until it is registered.
pub async fn connect_agent(addr: SocketAddr, state: &AppState) -> Client {
    let client = connect(addr, "/pepper").await;
    wait_until(move || async move { state.registry.has_agent().await }).await;
    client
}

/// Connects a viewer and waits until the viewer set reaches `expected`.
pub async fn connect_viewer(addr: SocketAddr, state: &AppState, expected: usize) -> Client {
    let client = connect(addr, "/").await;
    wait_until(move || async move { state.registry.viewer_count().await == expected }).await;
    client
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Next data message, skipping transport pings.
pub async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(message)) => return message,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no message received in time")
}

pub async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("invalid JSON"),
        other => panic!("expected text, got {:?}", other),
    }
}

pub async fn next_binary(client: &mut Client) -> Vec<u8> {
    match next_message(client).await {
        Message::Binary(data) => data.to_vec(),
        other => panic!("expected binary, got {:?}", other),
    }
}

/// Asserts nothing arrives within a short window.
pub async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(150), client.next()).await;
    assert!(result.is_err(), "unexpected message: {:?}", result);
}

pub async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

pub fn wav_clip() -> Vec<u8> {
    let samples: Vec<i16> = (0..8_000)
        .map(|i| ((i as f32 * 0.05).sin() * 8_000.0) as i16)
        .collect();
    wav::encode_wav(&samples, 16_000).unwrap()
}
