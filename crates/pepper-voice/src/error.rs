use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("normalization error: {0}")]
    Normalize(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM request timed out after {0} seconds")]
    UpstreamTimeout(u64),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
