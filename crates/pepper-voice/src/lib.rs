//! Speech capabilities for the Pepper bridge.
//!
//! Turns a recorded clip into a short spoken reply: container normalization,
//! voice-activity screening, transcription and language-model generation,
//! orchestrated by [`SpeechPipeline`]. Also owns the local microphone
//! [`CaptureLoop`] that feeds fixed-length windows into the pipeline.
//!
//! Every capability that touches a process, a file or a device is blocking
//! and runs on the blocking pool (or the capture thread). Only the
//! language-model client is async.

pub mod capture;
pub mod config;
#[cfg(feature = "cpal-audio")]
pub mod cpal_source;
pub mod error;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod stt;
pub mod vad;
pub mod wav;

pub use capture::{
    AudioSource, AudioSourceFactory, CaptureLoop, CapturedClip, ClipHandler, CommandAudioSource,
};
pub use config::{CaptureConfig, SpeechConfig, DEFAULT_BREVITY_PROMPT};
#[cfg(feature = "cpal-audio")]
pub use cpal_source::CpalAudioSource;
pub use error::VoiceError;
pub use llm::LanguageModelClient;
pub use normalize::{AudioNormalizer, ContainerNormalizer};
pub use pipeline::{PipelineOutcome, PipelineTask, SpeechPipeline, TaskOrigin};
pub use stt::{Transcriber, WhisperCliTranscriber};
pub use vad::{EnergyVad, EnergyVadConfig, VoiceActivityDetector};
