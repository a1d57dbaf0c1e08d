use thiserror::Error;

/// All errors produced by voicebox-core.
#[derive(Debug, Error)]
pub enum VoiceBoxError {
    #[error("no usable audio input device")]
    DeviceUnavailable,

    #[error("recording already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("transcription backend unavailable: {reason}")]
    TranscriptionUnavailable { reason: String, transient: bool },

    #[error("transcription backend rate-limited")]
    RateLimited,

    #[error("invalid audio artifact: {0}")]
    InvalidAudio(String),

    #[error("text injection failed: {0}")]
    InjectionFailed(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoiceBoxError {
    /// Whether the retry policy treats this failure as transient.
    ///
    /// Only rate limiting and transient backend unavailability (including
    /// bounded-wait timeouts) qualify; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VoiceBoxError::RateLimited
                | VoiceBoxError::TranscriptionUnavailable {
                    transient: true,
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, VoiceBoxError>;
