//! OpenAI Realtime control-channel message types.
//!
//! Every event is a JSON object discriminated by its `type` field and sent
//! as one text message on the `oai-events` data channel.
//!
//! # Protocol Overview
//!
//! Client events used by the bridge:
//! - session.update - Configure transcription, voice and turn detection
//! - conversation.item.create - Append an assistant text item
//! - response.create - Ask the model to vocalize the last item
//!
//! Server events the bridge acts on:
//! - conversation.item.input_audio_transcription.completed
//! - conversation.item.input_audio_transcription.failed
//! - response.audio_transcript.done
//! - error
//!
//! Every other server event type decodes to [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};

use super::config::Modality;

// =============================================================================
// Session Configuration
// =============================================================================

/// Partial session configuration sent with `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System instructions for the hosted model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Whether the server answers on its own once speech stops
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
    },
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item appended to the remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type ("message")
    #[serde(rename = "type")]
    pub item_type: String,

    /// Speaker role
    pub role: String,

    /// Content parts
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// An assistant message carrying one text part.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "assistant".to_string(),
            content: vec![ContentPart::text(text)],
        }
    }
}

/// One content part of a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Part type ("text")
    #[serde(rename = "type")]
    pub part_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// Parameters for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the hosted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
        }
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the hosted model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: Option<String>,
        error: ApiError,
    },

    /// Final transcript of one user utterance
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        item_id: String,
        #[serde(default)]
        content_index: Option<u32>,
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed {
        item_id: String,
        error: ApiError,
    },

    /// Text actually spoken for a synthesized reply
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        response_id: String,
        item_id: String,
        #[serde(default)]
        output_index: Option<u32>,
        transcript: String,
    },

    /// Interim, informational or future event types
    #[serde(other)]
    Other,
}

/// Error payload carried by `error` and failed-transcription events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}
