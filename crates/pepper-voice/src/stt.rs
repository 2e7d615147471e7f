use crate::error::VoiceError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Maximum canonical clip size accepted for transcription (10 MiB).
const MAX_STT_INPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Speech-to-text over a canonical WAV clip.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, wav_path: &Path) -> Result<String, VoiceError>;
}

/// Runs a whisper.cpp style command-line binary.
#[derive(Debug, Clone)]
pub struct WhisperCliTranscriber {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl WhisperCliTranscriber {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }
}

impl Transcriber for WhisperCliTranscriber {
    fn transcribe(&self, wav_path: &Path) -> Result<String, VoiceError> {
        let size = std::fs::metadata(wav_path)?.len();
        if size > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                size, MAX_STT_INPUT_BYTES
            )));
        }

        // -nt: no timestamps, -np: no progress/system prints, so stdout is the text.
        let output = Command::new(&self.binary_path)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(wav_path)
            .arg("-nt")
            .arg("-np")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr.trim())));
        }

        let text = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(text = %text, "transcribed text");
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mock-whisper.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn stdout_lines_are_joined() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.wav");
        std::fs::write(&clip, b"RIFF").unwrap();
        let binary = script(dir.path(), "echo ' hello there'\necho ''\necho 'robot '");

        let text = WhisperCliTranscriber::new("model.bin", binary)
            .transcribe(&clip)
            .unwrap();
        assert_eq!(text, "hello there robot");
    }

    #[test]
    fn failing_binary_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.wav");
        std::fs::write(&clip, b"RIFF").unwrap();
        let binary = script(dir.path(), "echo 'model not found' >&2\nexit 2");

        let err = WhisperCliTranscriber::new("model.bin", binary)
            .transcribe(&clip)
            .unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }
}
