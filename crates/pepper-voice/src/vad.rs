//! Voice activity detection over canonical WAV clips.

use crate::error::VoiceError;
use crate::wav;
use std::path::Path;

/// Measures how much speech a canonical clip contains.
pub trait VoiceActivityDetector: Send + Sync {
    /// Returns the cumulative detected speech duration in seconds.
    fn speech_seconds(&self, wav_path: &Path) -> Result<f32, VoiceError>;
}

/// Tuning for [`EnergyVad`].
#[derive(Debug, Clone, Copy)]
pub struct EnergyVadConfig {
    /// RMS level above which a frame counts as voiced (0.0 to 1.0).
    pub threshold: f32,
    pub frame_ms: u32,
    /// Voiced runs shorter than this are discarded.
    pub min_speech_ms: u32,
    /// Silences shorter than this do not split a voiced run.
    pub min_silence_ms: u32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            frame_ms: 30,
            min_speech_ms: 250,
            min_silence_ms: 500,
        }
    }
}

/// RMS-threshold detector that groups voiced frames into speech segments.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    config: EnergyVadConfig,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        tracing::info!(
            threshold = config.threshold,
            frame_ms = config.frame_ms,
            "energy VAD initialized"
        );
        Self { config }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self::new(EnergyVadConfig {
            threshold,
            ..EnergyVadConfig::default()
        })
    }

    fn rms(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: f32 = frame.iter().map(|s| s * s).sum();
        (sum / frame.len() as f32).sqrt()
    }

    /// Speech seconds for in-memory samples.
    pub fn measure(&self, samples: &[f32], sample_rate: u32) -> f32 {
        let frame_len = (sample_rate as usize * self.config.frame_ms as usize / 1000).max(1);
        let voiced: Vec<bool> = samples
            .chunks(frame_len)
            .map(|frame| Self::rms(frame) > self.config.threshold)
            .collect();

        let frame_ms = self.config.frame_ms.max(1);
        let max_gap = (self.config.min_silence_ms / frame_ms) as usize;
        let min_run = (self.config.min_speech_ms / frame_ms).max(1) as usize;

        // Segments as (first voiced frame, last voiced frame).
        let mut segments: Vec<(usize, usize)> = Vec::new();
        for (idx, _) in voiced.iter().enumerate().filter(|(_, v)| **v) {
            match segments.last_mut() {
                Some((_, end)) if idx - *end <= max_gap + 1 => *end = idx,
                _ => segments.push((idx, idx)),
            }
        }

        let speech_frames: usize = segments
            .iter()
            .map(|(start, end)| end - start + 1)
            .filter(|len| *len >= min_run)
            .sum();

        speech_frames as f32 * frame_len as f32 / sample_rate as f32
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn speech_seconds(&self, wav_path: &Path) -> Result<f32, VoiceError> {
        let (samples, sample_rate) = wav::read_mono_f32(wav_path)
            .map_err(|e| VoiceError::Vad(format!("failed to load clip: {}", e)))?;
        let seconds = self.measure(&samples, sample_rate);
        tracing::info!("detected speech duration: {:.2} seconds", seconds);
        Ok(seconds)
    }
}
