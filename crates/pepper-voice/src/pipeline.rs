//! Speech pipeline orchestration.
//!
//! One run takes a captured clip through normalize → voice-activity check →
//! transcription → response generation. Every stage has a terminal-failure
//! contract: a failing stage ends the run with an error outcome, and nothing
//! is retried. Temporary files live in a per-run directory that is removed
//! when the run returns, whichever way it ends.

use crate::config::SpeechConfig;
use crate::error::VoiceError;
use crate::llm::LanguageModelClient;
use crate::normalize::{AudioNormalizer, ContainerNormalizer};
use crate::stt::{Transcriber, WhisperCliTranscriber};
use crate::vad::{EnergyVad, VoiceActivityDetector};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const NO_TEXT_ERROR: &str = "Could not transcribe speech - no text detected";
const LLM_ERROR: &str = "Failed to get response from LLM";

/// Where a pipeline task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    /// A binary clip sent by a Viewer connection.
    Viewer(Uuid),
    /// `POST /api/speech`.
    Http,
    /// A window from the local capture loop.
    Microphone,
}

impl std::fmt::Display for TaskOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewer(id) => write!(f, "viewer:{}", id),
            Self::Http => f.write_str("http"),
            Self::Microphone => f.write_str("microphone"),
        }
    }
}

/// One run of the pipeline. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct PipelineTask {
    pub audio: Vec<u8>,
    pub origin: TaskOrigin,
}

impl PipelineTask {
    pub fn new(audio: impl Into<Vec<u8>>, origin: TaskOrigin) -> Self {
        Self {
            audio: audio.into(),
            origin,
        }
    }
}

/// Result object of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineOutcome {
    Success {
        input_text: String,
        llm_response: String,
        /// Seconds across the whole run, two decimals.
        processing_time: String,
    },
    NoSpeech {
        status: &'static str,
    },
    Error {
        error: String,
    },
}

impl PipelineOutcome {
    pub fn no_speech() -> Self {
        Self::NoSpeech { status: "no_speech" }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// The generated response, when the run succeeded.
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Success { llm_response, .. } => Some(llm_response),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"failed to serialize result: {}"}}"#, e))
    }
}

/// Stateless sequence of capability calls.
pub struct SpeechPipeline {
    normalizer: Arc<dyn AudioNormalizer>,
    vad: Option<Arc<dyn VoiceActivityDetector>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    llm: LanguageModelClient,
    min_speech_secs: f32,
    brevity_prompt: String,
}

impl SpeechPipeline {
    pub fn new(
        normalizer: Arc<dyn AudioNormalizer>,
        vad: Option<Arc<dyn VoiceActivityDetector>>,
        transcriber: Option<Arc<dyn Transcriber>>,
        llm: LanguageModelClient,
    ) -> Self {
        Self {
            normalizer,
            vad,
            transcriber,
            llm,
            min_speech_secs: 0.5,
            brevity_prompt: crate::config::DEFAULT_BREVITY_PROMPT.to_string(),
        }
    }

    pub fn with_min_speech_secs(mut self, seconds: f32) -> Self {
        self.min_speech_secs = seconds;
        self
    }

    pub fn with_brevity_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.brevity_prompt = prompt.into();
        self
    }

    /// Builds the pipeline with the default capabilities described by `config`.
    pub fn from_config(config: &SpeechConfig) -> Result<Self, VoiceError> {
        let normalizer: Arc<dyn AudioNormalizer> =
            Arc::new(ContainerNormalizer::new(&config.ffmpeg_binary));

        let vad: Option<Arc<dyn VoiceActivityDetector>> = if config.vad_enabled {
            Some(Arc::new(EnergyVad::with_threshold(config.vad_energy_threshold)))
        } else {
            tracing::warn!("voice activity detection disabled, clips will not be screened");
            None
        };

        let transcriber: Option<Arc<dyn Transcriber>> = match &config.whisper_model {
            Some(model) => Some(Arc::new(WhisperCliTranscriber::new(
                model,
                &config.whisper_binary,
            ))),
            None => {
                tracing::warn!("no whisper model configured, transcription is unavailable");
                None
            }
        };

        let llm = LanguageModelClient::new(
            &config.llm_url,
            &config.llm_model,
            config.max_tokens,
            config.llm_timeout(),
        )?;

        Ok(Self::new(normalizer, vad, transcriber, llm)
            .with_min_speech_secs(config.min_speech_secs)
            .with_brevity_prompt(&config.brevity_prompt))
    }

    /// Runs one task to completion.
    pub async fn process(&self, task: PipelineTask) -> PipelineOutcome {
        let started = Instant::now();
        let origin = task.origin;
        tracing::info!(origin = %origin, bytes = task.audio.len(), "pipeline task started");

        let workdir = match tempfile::Builder::new().prefix("pepper-clip-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(origin = %origin, "failed to create temporary directory: {}", e);
                return PipelineOutcome::error(format!("Error processing audio: {}", e));
            }
        };
        let raw_path = workdir.path().join("input.bin");
        let wav_path = workdir.path().join("clip.wav");

        // 1. Normalize
        let normalizer = self.normalizer.clone();
        let (raw, wav) = (raw_path.clone(), wav_path.clone());
        let audio = task.audio;
        let normalized = run_blocking(move || {
            std::fs::write(&raw, &audio)?;
            let result = normalizer.normalize(&raw, &wav);
            // The raw container is not needed past this stage.
            let _ = std::fs::remove_file(&raw);
            result
        })
        .await;
        if let Err(e) = normalized {
            tracing::error!(origin = %origin, "error converting audio: {}", e);
            return PipelineOutcome::error(format!("Error processing audio: {}", e));
        }

        // 2-3. Voice activity
        if !self.has_enough_speech(&wav_path, origin).await {
            return PipelineOutcome::no_speech();
        }

        // 4. Transcription
        let Some(input_text) = self.transcribe(&wav_path, origin).await else {
            return PipelineOutcome::error(NO_TEXT_ERROR);
        };
        // Canonical audio is done once the text exists.
        drop(workdir);

        // 5. Response generation
        let llm_response = match self.respond(&input_text, true).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(origin = %origin, "LLM stage failed: {}", e);
                return PipelineOutcome::error(LLM_ERROR);
            }
        };

        // 6. Success
        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(origin = %origin, seconds = elapsed, "pipeline task finished");
        PipelineOutcome::Success {
            input_text,
            llm_response,
            processing_time: format!("{:.2}", elapsed),
        }
    }

    /// Generates a response for already-transcribed text.
    pub async fn respond(&self, text: &str, brief: bool) -> Result<String, VoiceError> {
        let prompt = if brief && !self.brevity_prompt.is_empty() {
            format!("{}{}", self.brevity_prompt, text)
        } else {
            text.to_string()
        };
        self.llm.generate(&prompt).await
    }

    /// Fail-open: an unavailable or failing detector lets the clip through.
    async fn has_enough_speech(&self, wav_path: &std::path::Path, origin: TaskOrigin) -> bool {
        let Some(vad) = self.vad.clone() else {
            tracing::warn!(origin = %origin, "VAD unavailable, skipping voice check");
            return true;
        };

        let path = wav_path.to_path_buf();
        match run_blocking(move || vad.speech_seconds(&path)).await {
            Ok(seconds) if seconds >= self.min_speech_secs => true,
            Ok(seconds) => {
                tracing::info!(
                    origin = %origin,
                    seconds,
                    threshold = self.min_speech_secs,
                    "not enough speech in clip"
                );
                false
            }
            Err(e) => {
                tracing::error!(origin = %origin, "error in VAD processing, treating as speech: {}", e);
                true
            }
        }
    }

    /// Fail-closed: unavailable, failing or empty transcription ends the run.
    async fn transcribe(&self, wav_path: &std::path::Path, origin: TaskOrigin) -> Option<String> {
        let Some(transcriber) = self.transcriber.clone() else {
            tracing::error!(origin = %origin, "{}", VoiceError::CapabilityUnavailable("transcription"));
            return None;
        };

        let path: PathBuf = wav_path.to_path_buf();
        match run_blocking(move || transcriber.transcribe(&path)).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!(origin = %origin, "transcription produced no text");
                None
            }
            Err(e) => {
                tracing::error!(origin = %origin, "error in transcription: {}", e);
                None
            }
        }
    }
}

/// Runs a blocking capability call off the event loop.
async fn run_blocking<T, F>(f: F) -> Result<T, VoiceError>
where
    F: FnOnce() -> Result<T, VoiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VoiceError::Io(std::io::Error::other(format!("blocking task failed: {}", e))))?
}
