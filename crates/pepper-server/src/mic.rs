//! Glue between the microphone capture loop and the rest of the relay.

use crate::delivery::DeliveryQueue;
use crate::AppState;
use pepper_types::SayCommand;
use pepper_voice::{
    wav, CapturedClip, ClipHandler, PipelineTask, SpeechPipeline, TaskOrigin, VoiceError,
};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Turns completed capture windows into pipeline tasks on the runtime.
///
/// The capture thread only encodes and spawns; results carrying a response
/// reach the Agent through the delivery queue.
pub fn clip_handler(
    runtime: Handle,
    pipeline: Arc<SpeechPipeline>,
    queue: DeliveryQueue,
) -> ClipHandler {
    Arc::new(move |clip: CapturedClip| {
        let audio = match wav::encode_wav(&clip.samples, clip.sample_rate) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!("failed to encode captured window: {}", e);
                return;
            }
        };

        let pipeline = pipeline.clone();
        let queue = queue.clone();
        runtime.spawn(async move {
            let outcome = pipeline
                .process(PipelineTask::new(audio, TaskOrigin::Microphone))
                .await;
            match outcome.response() {
                Some(text) => queue.push(SayCommand::new(text).to_json()),
                None => tracing::debug!(result = %outcome.to_json(), "microphone clip produced no response"),
            }
        });
    })
}

/// Whether the microphone is currently capturing.
///
/// A loop that ended on a device fault counts as disabled.
pub async fn is_enabled(state: &AppState) -> bool {
    state.broker.mic_enabled().await && state.capture.is_running()
}

/// Starts or stops the capture loop and records the resulting flag.
pub async fn set_enabled(state: &Arc<AppState>, enable: bool) -> Result<bool, VoiceError> {
    let capture = state.capture.clone();

    if enable {
        let handler = clip_handler(Handle::current(), state.pipeline.clone(), state.queue.clone());
        let started = tokio::task::spawn_blocking(move || capture.start(handler))
            .await
            .map_err(|e| VoiceError::Device(format!("capture start task failed: {}", e)))??;
        if !started {
            tracing::debug!("microphone already enabled");
        }
    } else {
        tokio::task::spawn_blocking(move || capture.stop())
            .await
            .map_err(|e| VoiceError::Device(format!("capture stop task failed: {}", e)))?;
    }

    state.broker.set_mic_enabled(enable).await;
    tracing::info!(enabled = enable, "microphone toggled");
    Ok(enable)
}
