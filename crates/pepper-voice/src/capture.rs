//! Microphone capture loop.
//!
//! The loop owns the audio device on a dedicated thread. It reads fixed-size
//! chunks, accumulates them into fixed-length windows and hands each finished
//! window to a [`ClipHandler`] without waiting for downstream processing.
//! Cancellation is cooperative: the running flag is checked before every
//! chunk read and every window, so a stop takes effect within about one chunk.

use crate::config::CaptureConfig;
use crate::error::VoiceError;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A capture device. Owned by exactly one capture thread while active.
pub trait AudioSource: Send {
    /// Starts the device.
    fn start(&mut self) -> Result<(), VoiceError>;

    /// Blocks until the next chunk of mono 16-bit samples is available.
    fn read_samples(&mut self) -> Result<Vec<i16>, VoiceError>;

    /// Releases the device.
    fn stop(&mut self) -> Result<(), VoiceError>;
}

/// Opens a fresh source for every `start()`.
pub type AudioSourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn AudioSource>, VoiceError> + Send + Sync>;

/// One completed capture window.
#[derive(Debug, Clone)]
pub struct CapturedClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl CapturedClip {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Receives finished windows on the capture thread. Must return quickly.
pub type ClipHandler = Arc<dyn Fn(CapturedClip) + Send + Sync>;

/// Reads raw S16LE mono audio from a recorder subprocess (`arecord` by
/// default).
pub struct CommandAudioSource {
    command: Vec<String>,
    chunk_samples: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl CommandAudioSource {
    pub fn new(command: Vec<String>, chunk_samples: usize) -> Self {
        Self {
            command,
            chunk_samples: chunk_samples.max(1),
            child: None,
            stdout: None,
        }
    }

    /// Factory opening a recorder per the capture configuration.
    pub fn factory(config: &CaptureConfig) -> AudioSourceFactory {
        let command = config.recorder_command();
        let chunk_samples = config.chunk_samples;
        Arc::new(move || {
            Ok(Box::new(CommandAudioSource::new(command.clone(), chunk_samples)) as Box<dyn AudioSource>)
        })
    }
}

impl AudioSource for CommandAudioSource {
    fn start(&mut self) -> Result<(), VoiceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| VoiceError::Device("capture command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Device(format!("failed to start {}: {}", program, e)))?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        tracing::info!(program = %program, "microphone recorder started");
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>, VoiceError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| VoiceError::Device("recorder not started".to_string()))?;

        let mut bytes = vec![0u8; self.chunk_samples * 2];
        stdout.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                VoiceError::Device("recorder stream ended".to_string())
            } else {
                VoiceError::Device(format!("failed to read recorder output: {}", e))
            }
        })?;

        Ok(bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }

    fn stop(&mut self) -> Result<(), VoiceError> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // The recorder may already have exited on a device fault.
            let _ = child.kill();
            child
                .wait()
                .map_err(|e| VoiceError::Device(format!("failed to reap recorder: {}", e)))?;
            tracing::info!("microphone recorder stopped");
        }
        Ok(())
    }
}

impl Drop for CommandAudioSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Start/stop controller for the capture thread.
pub struct CaptureLoop {
    factory: AudioSourceFactory,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn new(factory: AudioSourceFactory, config: CaptureConfig) -> Self {
        Self {
            factory,
            config,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Opens the device and starts capturing.
    ///
    /// Returns `Ok(false)` without side effects when already running. Blocks
    /// while the device opens, so async callers should use `spawn_blocking`.
    pub fn start(&self, on_clip: ClipHandler) -> Result<bool, VoiceError> {
        let mut worker = self.lock_worker();
        if self.is_running() {
            tracing::info!("capture loop already running");
            return Ok(false);
        }

        // A previous loop that ended on a device fault is already finished.
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let mut source = (self.factory)()?;
        source.start()?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("pepper-capture".to_string())
            .spawn(move || run_capture(source, config, running, on_clip))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                VoiceError::Device(format!("failed to spawn capture thread: {}", e))
            })?;

        *worker = Some(handle);
        tracing::info!(
            sample_rate = self.config.sample_rate,
            window_secs = self.config.window_secs,
            "capture loop started"
        );
        Ok(true)
    }

    /// Requests a stop and waits for the device to be released.
    ///
    /// Returns `false` without side effects when the loop is idle.
    pub fn stop(&self) -> bool {
        let mut worker = self.lock_worker();
        let was_running = self.running.swap(false, Ordering::SeqCst);

        match worker.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    tracing::error!("capture thread panicked");
                }
                if was_running {
                    tracing::info!("capture loop stopped");
                } else {
                    tracing::info!("capture loop had already ended");
                }
                was_running
            }
            None => {
                tracing::info!("capture loop not running");
                false
            }
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // A panic while holding the lock leaves only a stale handle behind.
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Body of the capture thread.
fn run_capture(
    mut source: Box<dyn AudioSource>,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    on_clip: ClipHandler,
) {
    let window_samples = config.window_samples().max(1);

    'windows: while running.load(Ordering::SeqCst) {
        let mut window: Vec<i16> = Vec::with_capacity(window_samples);

        while window.len() < window_samples {
            if !running.load(Ordering::SeqCst) {
                break 'windows;
            }
            match source.read_samples() {
                Ok(chunk) => window.extend_from_slice(&chunk),
                Err(e) => {
                    tracing::error!("audio device error, capture loop ending: {}", e);
                    break 'windows;
                }
            }
        }

        window.truncate(window_samples);
        tracing::debug!(samples = window.len(), "capture window complete");
        on_clip(CapturedClip {
            samples: window,
            sample_rate: config.sample_rate,
        });
    }

    if let Err(e) = source.stop() {
        tracing::error!("failed to release audio device: {}", e);
    }
    running.store(false, Ordering::SeqCst);
}
