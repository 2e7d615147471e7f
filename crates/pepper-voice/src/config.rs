use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BREVITY_PROMPT: &str = "IMPORTANT: Be extremely brief. Respond with only 1-2 very short sentences. No greetings or explanations. Question: ";

fn default_llm_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_llm_model() -> String {
    "gemma3:12b".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_min_speech_secs() -> f32 {
    0.5
}

fn default_brevity_prompt() -> String {
    DEFAULT_BREVITY_PROMPT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_vad_energy_threshold() -> f32 {
    0.02
}

fn default_ffmpeg_binary() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_whisper_binary() -> PathBuf {
    PathBuf::from("whisper-cli")
}

/// Speech pipeline settings (`[speech]` table).
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    /// Language-model generate endpoint.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Fixed timeout for one language-model call. Default: 30.
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    /// Minimum cumulative speech for a clip to be transcribed. Default: 0.5.
    #[serde(default = "default_min_speech_secs")]
    pub min_speech_secs: f32,
    #[serde(default = "default_brevity_prompt")]
    pub brevity_prompt: String,
    /// When false the voice-activity capability is treated as unavailable.
    #[serde(default = "default_true")]
    pub vad_enabled: bool,
    #[serde(default = "default_vad_energy_threshold")]
    pub vad_energy_threshold: f32,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: PathBuf,
    #[serde(default = "default_whisper_binary")]
    pub whisper_binary: PathBuf,
    /// whisper.cpp model. Transcription is unavailable without one.
    #[serde(default)]
    pub whisper_model: Option<PathBuf>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            llm_url: default_llm_url(),
            llm_model: default_llm_model(),
            max_tokens: default_max_tokens(),
            llm_timeout_secs: default_llm_timeout_secs(),
            min_speech_secs: default_min_speech_secs(),
            brevity_prompt: default_brevity_prompt(),
            vad_enabled: true,
            vad_energy_threshold: default_vad_energy_threshold(),
            ffmpeg_binary: default_ffmpeg_binary(),
            whisper_binary: default_whisper_binary(),
            whisper_model: None,
        }
    }
}

impl SpeechConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_chunk_samples() -> usize {
    1024
}

fn default_window_secs() -> u64 {
    5
}


/// Microphone capture settings (`[capture]` table).
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per device read. Bounds stop latency.
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
    /// Length of one clip handed to the pipeline.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Recorder command writing raw mono S16LE to stdout. Empty selects
    /// `arecord` at `sample_rate`; a custom command must record at that rate.
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_samples: default_chunk_samples(),
            window_secs: default_window_secs(),
            command: Vec::new(),
        }
    }
}

impl CaptureConfig {
    pub fn window_samples(&self) -> usize {
        self.sample_rate as usize * self.window_secs as usize
    }

    /// The recorder command line actually run.
    pub fn recorder_command(&self) -> Vec<String> {
        if !self.command.is_empty() {
            return self.command.clone();
        }
        let rate = self.sample_rate.to_string();
        ["arecord", "-q", "-f", "S16_LE", "-r", rate.as_str(), "-c", "1", "-t", "raw"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}
