//! Wire types of the live conversation API and their mapping onto the
//! session's transport-neutral inbound/outbound messages.

use serde::{Deserialize, Serialize};

// ---------------- transport-neutral shapes ----------------

/// Everything the session cares about in one inbound message. Any subset of
/// fields may be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// base64 16-bit PCM at the output sample rate
    pub audio_chunk: Option<String>,
    pub interrupted: bool,
    pub input_transcript: Option<String>,
    pub output_transcript: Option<String>,
    pub turn_complete: bool,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One encoded capture frame.
    Media { data: String, mime_type: String },
}

// ---------------- server → client ----------------

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<Blob>,
    pub text: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

fn non_empty(t: Option<Transcription>) -> Option<String> {
    t.and_then(|t| t.text).filter(|text| !text.is_empty())
}

impl From<ServerMessage> for InboundMessage {
    fn from(msg: ServerMessage) -> Self {
        let Some(content) = msg.server_content else {
            return Self::default();
        };
        // only the first part carries audio
        let audio_chunk = content
            .model_turn
            .and_then(|turn| turn.parts.into_iter().next())
            .and_then(|part| part.inline_data)
            .map(|blob| blob.data)
            .filter(|data| !data.is_empty());

        Self {
            audio_chunk,
            interrupted: content.interrupted,
            input_transcript: non_empty(content.input_transcription),
            output_transcript: non_empty(content.output_transcription),
            turn_complete: content.turn_complete,
        }
    }
}

// ---------------- client → server ----------------

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub input_audio_transcription: EmptyConfig,
    pub output_audio_transcription: EmptyConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug)]
pub struct TextPart {
    pub text: String,
}

#[derive(Serialize, Debug, Default)]
pub struct EmptyConfig {}

impl SetupMessage {
    pub fn new(model: &str, voice: &str, system_instruction: &str) -> Self {
        let system_instruction = (!system_instruction.is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: system_instruction.to_string(),
            }],
        });
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction,
                input_audio_transcription: EmptyConfig::default(),
                output_audio_transcription: EmptyConfig::default(),
            },
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl From<OutboundMessage> for RealtimeInputMessage {
    fn from(msg: OutboundMessage) -> Self {
        match msg {
            OutboundMessage::Media { data, mime_type } => Self {
                realtime_input: RealtimeInput {
                    media_chunks: vec![Blob { mime_type, data }],
                },
            },
        }
    }
}
