use crate::error::VoiceError;
use crate::wav;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Converts an arbitrary audio container into the canonical PCM WAV.
///
/// Implementations block; the pipeline calls them from `spawn_blocking`.
pub trait AudioNormalizer: Send + Sync {
    fn normalize(&self, input: &Path, output: &Path) -> Result<(), VoiceError>;
}

/// Decodes WAV input in-process and hands every other container to ffmpeg.
#[derive(Debug, Clone)]
pub struct ContainerNormalizer {
    ffmpeg_binary: PathBuf,
}

impl ContainerNormalizer {
    pub fn new(ffmpeg_binary: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_binary: ffmpeg_binary.into(),
        }
    }

    fn normalize_wav(&self, input: &Path, output: &Path) -> Result<(), VoiceError> {
        let file = std::fs::File::open(input)?;
        let samples = wav::decode_to_canonical(std::io::BufReader::new(file))?;
        wav::write_wav(output, &samples, wav::CANONICAL_SAMPLE_RATE)
    }

    fn normalize_with_ffmpeg(&self, input: &Path, output: &Path) -> Result<(), VoiceError> {
        let result = Command::new(&self.ffmpeg_binary)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(wav::CANONICAL_SAMPLE_RATE.to_string())
            .arg("-sample_fmt")
            .arg("s16")
            .arg("-f")
            .arg("wav")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                VoiceError::Normalize(format!(
                    "failed to spawn {}: {}",
                    self.ffmpeg_binary.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(VoiceError::Normalize(format!(
                "ffmpeg failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl AudioNormalizer for ContainerNormalizer {
    fn normalize(&self, input: &Path, output: &Path) -> Result<(), VoiceError> {
        let mut header = [0u8; 12];
        let read = std::fs::File::open(input)?.read(&mut header)?;

        if wav::is_wav(&header[..read]) {
            tracing::debug!(input = %input.display(), "normalizing WAV input in-process");
            self.normalize_wav(input, output)
        } else {
            tracing::debug!(input = %input.display(), "normalizing input with ffmpeg");
            self.normalize_with_ffmpeg(input, output)
        }
    }
}
