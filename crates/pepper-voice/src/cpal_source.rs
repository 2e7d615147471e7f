//! Native microphone input through cpal.
//!
//! cpal streams are not `Send` on every host, so the stream lives on its own
//! thread and hands samples over a channel. The source itself only holds the
//! receiving end and can move freely to the capture thread.

use crate::capture::{AudioSource, AudioSourceFactory};
use crate::config::CaptureConfig;
use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

const CHANNELS: u16 = 1;

pub struct CpalAudioSource {
    sample_rate: u32,
    chunk_samples: usize,
    pending: Vec<i16>,
    samples_rx: Option<mpsc::Receiver<Vec<i16>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
}

impl CpalAudioSource {
    pub fn new(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            sample_rate,
            chunk_samples: chunk_samples.max(1),
            pending: Vec::new(),
            samples_rx: None,
            stop_tx: None,
            stream_thread: None,
        }
    }

    pub fn factory(config: &CaptureConfig) -> AudioSourceFactory {
        let sample_rate = config.sample_rate;
        let chunk_samples = config.chunk_samples;
        Arc::new(move || {
            Ok(Box::new(CpalAudioSource::new(sample_rate, chunk_samples)) as Box<dyn AudioSource>)
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<(), VoiceError> {
        let (samples_tx, samples_rx) = mpsc::channel::<Vec<i16>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), VoiceError>>();
        let sample_rate = self.sample_rate;

        let handle = std::thread::Builder::new()
            .name("pepper-cpal".to_string())
            .spawn(move || {
                let stream = match open_stream(sample_rate, samples_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Either an explicit stop or the source being dropped ends the stream.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::Device(format!("failed to spawn stream thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(VoiceError::Device("stream thread exited during setup".to_string()));
            }
        }

        self.samples_rx = Some(samples_rx);
        self.stop_tx = Some(stop_tx);
        self.stream_thread = Some(handle);
        tracing::info!("audio capture started");
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>, VoiceError> {
        let rx = self
            .samples_rx
            .as_ref()
            .ok_or_else(|| VoiceError::Device("stream not started".to_string()))?;

        while self.pending.len() < self.chunk_samples {
            let data = rx
                .recv()
                .map_err(|_| VoiceError::Device("audio stream closed".to_string()))?;
            self.pending.extend_from_slice(&data);
        }
        let rest = self.pending.split_off(self.chunk_samples);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    fn stop(&mut self) -> Result<(), VoiceError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.samples_rx = None;
        self.pending.clear();
        if let Some(handle) = self.stream_thread.take() {
            handle
                .join()
                .map_err(|_| VoiceError::Device("stream thread panicked".to_string()))?;
            tracing::info!("audio capture stopped");
        }
        Ok(())
    }
}

fn open_stream(
    sample_rate: u32,
    samples_tx: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream, VoiceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::Device("no default input device found".to_string()))?;

    if let Ok(name) = device.name() {
        tracing::info!("using input device: {}", name);
    }

    let supported = device
        .supported_input_configs()
        .map_err(|e| VoiceError::Device(e.to_string()))?;

    let mut config: Option<(StreamConfig, SampleFormat)> = None;
    for range in supported {
        tracing::debug!("supported config: {:?}", range);
        if range.channels() == CHANNELS
            && range.min_sample_rate().0 <= sample_rate
            && range.max_sample_rate().0 >= sample_rate
        {
            let format = range.sample_format();
            config = Some((range.with_sample_rate(cpal::SampleRate(sample_rate)).into(), format));
            break;
        }
    }
    let (stream_config, format) = config
        .ok_or_else(|| VoiceError::Device("no suitable audio configuration found".to_string()))?;

    let error_callback = |err| tracing::error!("audio stream error: {}", err);

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                let _ = samples_tx.send(data.to_vec());
            },
            error_callback,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| {
                let converted = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                let _ = samples_tx.send(converted);
            },
            error_callback,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &_| {
                let converted = data.iter().map(|&s| (s as i32 - 32_768) as i16).collect();
                let _ = samples_tx.send(converted);
            },
            error_callback,
            None,
        ),
        other => {
            return Err(VoiceError::Device(format!("unsupported sample format: {:?}", other)));
        }
    }
    .map_err(|e| VoiceError::Device(e.to_string()))?;

    stream.play().map_err(|e| VoiceError::Device(e.to_string()))?;
    Ok(stream)
}
