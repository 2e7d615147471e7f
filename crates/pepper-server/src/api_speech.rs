//! HTTP control surface: speech submission, response forwarding and the
//! microphone toggle.

use crate::api::ApiError;
use crate::{mic, AppState};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, rejection::JsonRejection, ws::Message, Multipart},
    http::StatusCode,
    Extension, Json,
};
use pepper_types::SayCommand;
use pepper_voice::{PipelineOutcome, PipelineTask, TaskOrigin};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Multipart field carrying the recorded clip.
const AUDIO_FIELD: &str = "audio";

/// `POST /api/speech`: runs the speech pipeline on an uploaded clip.
///
/// A generated response is also queued for the Agent as a say command.
pub async fn speech_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<PipelineOutcome>), ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut audio: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some(AUDIO_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read audio field: {}", e)))?;
            audio = Some(data);
            break;
        }
    }

    let audio = audio
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No audio file provided".to_string()))?;
    tracing::info!(bytes = audio.len(), "received speech upload");

    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move {
        pipeline
            .process(PipelineTask::new(audio.to_vec(), TaskOrigin::Http))
            .await
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("speech task failed: {}", e)))?;

    if let Some(text) = outcome.response() {
        state.queue.push(SayCommand::new(text).to_json());
    }

    let status = if outcome.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub response: Option<String>,
    pub input_text: Option<String>,
}

/// `POST /api/receive`: forwards an externally produced response to the
/// Agent as a say command.
pub async fn receive_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<ReceiveRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let response = payload
        .response
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("No response provided".to_string()))?;

    if let Some(input) = &payload.input_text {
        tracing::info!(input_text = %input, "forwarding response for recognized input");
    }

    state
        .registry
        .send_to_agent(Message::Text(SayCommand::new(&response).to_json().into()))
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("Pepper not connected: {}", e)))?;

    tracing::info!(response = %response, "response forwarded to agent");
    Ok(Json(json!({ "status": "success" })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleMicRequest {
    pub enable: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ToggleMicResponse {
    pub status: &'static str,
    pub mic_enabled: bool,
}

/// `POST /api/toggle_mic`: `{"enable": bool}` sets the state, an absent
/// `enable` (or an empty body) flips it.
pub async fn toggle_mic_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ToggleMicResponse>, ApiError> {
    let request: ToggleMicRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ToggleMicRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let enable = match request.enable {
        Some(enable) => enable,
        None => !mic::is_enabled(&state).await,
    };

    let mic_enabled = mic::set_enabled(&state, enable).await.map_err(|e| {
        tracing::error!("failed to toggle microphone: {}", e);
        ApiError::InternalServerError(e.to_string())
    })?;

    Ok(Json(ToggleMicResponse {
        status: "success",
        mic_enabled,
    }))
}
