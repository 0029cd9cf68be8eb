use thiserror::Error;

/// Failures that end a session attempt or a live session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Microphone access denied: {0}")]
    Permission(String),

    #[error("Remote channel failure: {0}")]
    Channel(String),

    #[error("Audio output device failure: {0}")]
    Device(String),
}

/// A malformed inbound audio payload. Recovered locally: the chunk is dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Truncated PCM payload: {len} bytes is not a multiple of {frame_bytes}")]
    Truncated { len: usize, frame_bytes: usize },

    #[error("Empty audio payload")]
    Empty,
}
