//! OpenAI Realtime control protocol.
//!
//! The hosted speech model is reached over WebRTC: audio flows on media
//! tracks while JSON control events travel on the `oai-events` data channel.
//! This module owns the wire types and the codec for that channel.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview`
//! - `gpt-4o-realtime-preview-2024-12-17` (default)
//! - `gpt-4o-mini-realtime-preview`
//! - `gpt-4o-mini-realtime-preview-2024-12-17`
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

pub mod codec;
mod config;
mod messages;

pub use codec::{
    CodecError, ControlEvent, decode, encode, encode_session_update, encode_synthesis_request,
};
pub use config::{
    DEFAULT_SYNTHESIS_INSTRUCTIONS, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_CONTROL_CHANNEL_LABEL, OPENAI_REALTIME_SIGNALING_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription,
    ResponseConfig, ServerEvent, SessionConfig, TurnDetection,
};
