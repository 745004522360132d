//! Control protocol codec.
//!
//! Translates raw data-channel text into the closed set of [`ControlEvent`]s
//! the bridge acts on, and builds the outbound JSON messages.

use thiserror::Error;
use tracing::trace;

use super::config::Modality;
use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, ResponseConfig, ServerEvent,
    SessionConfig, TurnDetection,
};
use crate::core::realtime::base::BridgeError;

/// Typed inbound control events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Final transcript of one completed user utterance
    SpeechTranscribed { item_id: String, transcript: String },

    /// Text the provider reports as spoken for a synthesized reply
    SynthesisTranscriptDone {
        response_id: String,
        item_id: String,
        transcript: String,
    },

    /// Error-flagged inbound message
    ProtocolError {
        code: Option<String>,
        message: String,
    },
}

/// Errors raised while decoding inbound control messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed control message: {0}")]
    Malformed(String),

    #[error("failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        BridgeError::protocol(None, err.to_string())
    }
}

/// Decode one inbound text message.
///
/// Returns `Ok(None)` for interim and unknown event types so new provider
/// events never break a running session.
pub fn decode(raw: &str) -> Result<Option<ControlEvent>, CodecError> {
    let event: ServerEvent =
        serde_json::from_str(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let decoded = match event {
        ServerEvent::InputAudioTranscriptionCompleted {
            item_id, transcript, ..
        } => Some(ControlEvent::SpeechTranscribed {
            item_id,
            transcript,
        }),
        ServerEvent::ResponseAudioTranscriptDone {
            response_id,
            item_id,
            transcript,
            ..
        } => Some(ControlEvent::SynthesisTranscriptDone {
            response_id,
            item_id,
            transcript,
        }),
        ServerEvent::Error { error, .. } => Some(ControlEvent::ProtocolError {
            code: error.code.or(error.error_type),
            message: error
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        }),
        ServerEvent::InputAudioTranscriptionFailed { item_id, error } => {
            Some(ControlEvent::ProtocolError {
                code: error.code.or(error.error_type),
                message: format!(
                    "transcription failed for {item_id}: {}",
                    error.message.unwrap_or_default()
                ),
            })
        }
        ServerEvent::Other => None,
    };

    Ok(decoded)
}

/// Serialize one client event.
pub fn encode(event: &ClientEvent) -> Result<String, CodecError> {
    trace!(kind = event.kind(), "Encoding client event");
    Ok(serde_json::to_string(event)?)
}

/// Build the two-step synthesis request for `text`.
///
/// The first message appends an assistant text item to the remote
/// conversation; the second asks the model to vocalize it. They must be
/// sent in this order.
pub fn encode_synthesis_request(text: &str, instructions: &str) -> Result<[String; 2], CodecError> {
    let item = ClientEvent::ConversationItemCreate {
        item: ConversationItem::assistant_text(text),
    };
    let response = ClientEvent::ResponseCreate {
        response: Some(ResponseConfig {
            modalities: Some(vec![Modality::Text, Modality::Audio]),
            instructions: Some(instructions.to_string()),
        }),
    };
    Ok([encode(&item)?, encode(&response)?])
}

/// Build the `session.update` sent once the control channel opens.
///
/// Server VAD is kept for turn segmentation but never creates responses on
/// its own; replies come only from the text-generation backend.
pub fn encode_session_update(
    transcription_model: &str,
    voice: Option<&str>,
    instructions: Option<&str>,
) -> Result<String, CodecError> {
    let event = ClientEvent::SessionUpdate {
        session: SessionConfig {
            instructions: instructions.map(str::to_string),
            voice: voice.map(str::to_string),
            input_audio_transcription: Some(InputAudioTranscription {
                model: transcription_model.to_string(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                create_response: Some(false),
            }),
        },
    };
    encode(&event)
}
