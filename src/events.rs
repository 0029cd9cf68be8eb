//! Typed notifications flowing out of the session controller, and the
//! commands flowing into it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptFragment {
    pub text: String,
    pub sender: Speaker,
    pub is_complete: bool,
}

/// Input and output loudness, each in [0, 1].
///
/// `output` is a presence pulse rather than a measured level: it is raised
/// while agent audio is arriving or playing and dropped to zero once playback
/// goes idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VolumeLevels {
    pub input: f32,
    pub output: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status { status: ConnectionStatus },
    Volume(VolumeLevels),
    Transcription(TranscriptFragment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserCommand {
    Connect,
    Disconnect,
    Toggle,
    Shutdown,
}
