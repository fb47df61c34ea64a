//! Error types for synthesis, playback and session operations.

use parla_core::types::API_KEY_ENV;

/// Failure while talking to the speech provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),
    /// The provider answered with a non-success status. `message` is the
    /// provider's own text, shown verbatim.
    #[error("{message}")]
    Provider { status: u16, message: String },
    /// The response body broke off mid-stream.
    #[error("audio stream interrupted: {0}")]
    Stream(String),
}

/// Failure in the local audio output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output unavailable")]
    Unavailable,
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("audio device error: {0}")]
    Device(String),
}

/// Errors returned by session controller operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("missing ElevenLabs API key; set {} or pass --api-key", API_KEY_ENV)]
    MissingCredential,
    #[error("text is empty")]
    EmptyText,
    #[error("unknown voice '{0}'")]
    UnknownVoice(String),
    #[error("a synthesis request is already in flight")]
    Busy,
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("no audio available")]
    NoAudio,
    #[error("failed to write audio: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Input rejections leave the session state untouched and are not
    /// surfaced through `last_error`.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::EmptyText | SessionError::UnknownVoice(_) | SessionError::Busy
        )
    }
}
