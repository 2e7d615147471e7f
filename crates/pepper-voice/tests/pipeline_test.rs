use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use pepper_voice::{
    wav, AudioNormalizer, ContainerNormalizer, LanguageModelClient, PipelineOutcome, PipelineTask,
    SpeechPipeline, TaskOrigin, Transcriber, VoiceActivityDetector, VoiceError,
    DEFAULT_BREVITY_PROMPT,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedVad {
    seconds: Result<f32, &'static str>,
    calls: AtomicUsize,
}

fn vad(detector: Arc<FixedVad>) -> Option<Arc<dyn VoiceActivityDetector>> {
    Some(detector)
}

fn stt(transcriber: Arc<FixedTranscriber>) -> Option<Arc<dyn Transcriber>> {
    Some(transcriber)
}

impl FixedVad {
    fn speech(seconds: f32) -> Arc<Self> {
        Arc::new(Self {
            seconds: Ok(seconds),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            seconds: Err("model crashed"),
            calls: AtomicUsize::new(0),
        })
    }
}

impl VoiceActivityDetector for FixedVad {
    fn speech_seconds(&self, wav_path: &Path) -> Result<f32, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(wav_path.exists(), "canonical clip must exist during VAD");
        self.seconds.map_err(|e| VoiceError::Vad(e.to_string()))
    }
}

struct FixedTranscriber {
    text: String,
    calls: AtomicUsize,
}

impl FixedTranscriber {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl Transcriber for FixedTranscriber {
    fn transcribe(&self, wav_path: &Path) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (samples, rate) = wav::read_mono_f32(wav_path)?;
        assert_eq!(rate, wav::CANONICAL_SAMPLE_RATE);
        assert!(!samples.is_empty());
        Ok(self.text.clone())
    }
}

#[derive(Clone, Default)]
struct MockLlm {
    prompts: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

async fn generate(State(mock): State<MockLlm>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    assert_eq!(body["stream"], false);
    mock.prompts.lock().unwrap().push(prompt);
    if mock.fail {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "overloaded"})))
    } else {
        (StatusCode::OK, Json(json!({"response": " Hello, human. "})))
    }
}

async fn spawn_llm(mock: MockLlm) -> String {
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/generate", addr)
}

fn llm(url: &str) -> LanguageModelClient {
    LanguageModelClient::new(url, "test-model", 100, Duration::from_secs(5)).unwrap()
}

fn clip() -> Vec<u8> {
    let samples: Vec<i16> = (0..16_000)
        .map(|i| ((i as f32 * 0.05).sin() * 8_000.0) as i16)
        .collect();
    wav::encode_wav(&samples, 16_000).unwrap()
}

fn normalizer() -> Arc<dyn AudioNormalizer> {
    Arc::new(ContainerNormalizer::new("ffmpeg-not-needed-for-wav"))
}

#[tokio::test]
async fn successful_run_produces_text_and_response() {
    let mock = MockLlm::default();
    let url = spawn_llm(mock.clone()).await;
    let detector = FixedVad::speech(1.2);
    let transcriber = FixedTranscriber::new("what time is it");

    let pipeline = SpeechPipeline::new(normalizer(), vad(detector.clone()), stt(transcriber.clone()), llm(&url));
    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;

    match &outcome {
        PipelineOutcome::Success {
            input_text,
            llm_response,
            processing_time,
        } => {
            assert_eq!(input_text, "what time is it");
            assert_eq!(llm_response, "Hello, human.");
            assert!(processing_time.parse::<f64>().is_ok());
            assert_eq!(processing_time.split('.').nth(1).map(str::len), Some(2));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let prompts = mock.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0], format!("{}what time is it", DEFAULT_BREVITY_PROMPT));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn too_little_speech_short_circuits() {
    let mock = MockLlm::default();
    let url = spawn_llm(mock.clone()).await;
    let stt_mock = FixedTranscriber::new("ignored");

    let pipeline = SpeechPipeline::new(
        normalizer(),
        vad(FixedVad::speech(0.2)),
        stt(stt_mock.clone()),
        llm(&url),
    );
    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Microphone))
        .await;

    assert_eq!(outcome, PipelineOutcome::no_speech());
    assert_eq!(stt_mock.calls.load(Ordering::SeqCst), 0);
    assert!(mock.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_vad_lets_the_clip_through() {
    let url = spawn_llm(MockLlm::default()).await;
    let stt_mock = FixedTranscriber::new("hello robot");

    let pipeline = SpeechPipeline::new(
        normalizer(),
        vad(FixedVad::failing()),
        stt(stt_mock.clone()),
        llm(&url),
    );
    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;

    assert_eq!(outcome.response(), Some("Hello, human."));
    assert_eq!(stt_mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_vad_lets_the_clip_through() {
    let url = spawn_llm(MockLlm::default()).await;
    let pipeline = SpeechPipeline::new(
        normalizer(),
        None,
        stt(FixedTranscriber::new("hello robot")),
        llm(&url),
    );
    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;
    assert!(!outcome.is_error(), "{:?}", outcome);
}

#[tokio::test]
async fn missing_transcriber_fails_the_run() {
    let mock = MockLlm::default();
    let url = spawn_llm(mock.clone()).await;
    let pipeline = SpeechPipeline::new(normalizer(), vad(FixedVad::speech(2.0)), None, llm(&url));

    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;

    assert_eq!(
        outcome,
        PipelineOutcome::error("Could not transcribe speech - no text detected")
    );
    assert!(mock.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_transcript_fails_the_run() {
    let url = spawn_llm(MockLlm::default()).await;
    let pipeline = SpeechPipeline::new(
        normalizer(),
        vad(FixedVad::speech(2.0)),
        stt(FixedTranscriber::new("   ")),
        llm(&url),
    );
    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;
    assert!(outcome.is_error());
}

#[tokio::test]
async fn llm_error_status_fails_without_retry() {
    let mock = MockLlm {
        fail: true,
        ..MockLlm::default()
    };
    let url = spawn_llm(mock.clone()).await;
    let pipeline = SpeechPipeline::new(
        normalizer(),
        vad(FixedVad::speech(2.0)),
        stt(FixedTranscriber::new("hello")),
        llm(&url),
    );

    let outcome = pipeline
        .process(PipelineTask::new(clip(), TaskOrigin::Http))
        .await;

    assert_eq!(outcome, PipelineOutcome::error("Failed to get response from LLM"));
    assert_eq!(mock.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn undecodable_audio_is_a_processing_error() {
    let url = spawn_llm(MockLlm::default()).await;
    let stt_mock = FixedTranscriber::new("never");
    let pipeline = SpeechPipeline::new(
        Arc::new(ContainerNormalizer::new("/nonexistent/ffmpeg")),
        vad(FixedVad::speech(2.0)),
        stt(stt_mock.clone()),
        llm(&url),
    );

    let outcome = pipeline
        .process(PipelineTask::new(b"not audio at all".to_vec(), TaskOrigin::Http))
        .await;

    match outcome {
        PipelineOutcome::Error { error } => assert!(error.starts_with("Error processing audio:")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(stt_mock.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn respond_without_brevity_sends_raw_text() {
    let mock = MockLlm::default();
    let url = spawn_llm(mock.clone()).await;
    let pipeline = SpeechPipeline::new(normalizer(), None, None, llm(&url));

    let reply = pipeline.respond("tell me a story", false).await.unwrap();
    assert_eq!(reply, "Hello, human.");
    assert_eq!(mock.prompts.lock().unwrap()[0], "tell me a story");
}

#[tokio::test]
async fn unreachable_llm_is_an_error() {
    let client = llm("http://127.0.0.1:9/api/generate");
    assert!(client.generate("hi").await.is_err());
}
