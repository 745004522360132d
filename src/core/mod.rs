pub mod bridge;
pub mod chat;
pub mod realtime;
pub mod transcript;

// Re-export commonly used types for convenience
pub use bridge::{VoiceBridge, VoiceBridgeBuilder};

pub use chat::{ChatMessage, ChatRequest, FragmentStream, HttpTextBackend, TextBackend};

pub use realtime::{
    AudioFrame, BridgeError, BridgeResult, ChannelMediaSource, ConnectionState,
    CredentialProvider, EphemeralToken, ErrorKind, HttpCredentialProvider, MediaFeed, MediaSource,
    MediaTrack, SessionId, SignalingClient, SynthesizedSpeech, TransportFactory,
    WebRtcTransportFactory,
};

pub use transcript::{ConversationTurn, Origin, Role, TranscriptStore};
