//! Realtime speech session plumbing.
//!
//! Everything needed to hold one live audio session with the hosted speech
//! model: credentials, microphone capture, the WebRTC transport, the SDP
//! offer/answer exchange and the JSON control protocol.
//!
//! # Architecture
//!
//! Each collaborator sits behind a trait so the bridge can be driven by
//! in-memory fakes in tests:
//! - [`CredentialProvider`] mints the short-lived bearer token
//! - [`MediaSource`] hands out microphone tracks
//! - [`TransportFactory`] / [`Transport`] / [`ControlChannel`] carry media
//!   and control events
//!
//! # Audio Format
//!
//! Outbound and inbound audio is Opus at 48kHz, packetized by the transport.

pub mod base;
pub mod credentials;
pub mod media;
pub mod openai;
pub mod signaling;
pub mod transport;
pub mod peer;

pub use base::{
    BridgeError, BridgeErrorCallback, BridgeResult, ConnectionState, ErrorKind, SessionId,
    SpeechSynthesizedCallback, StateChangeCallback, SynthesizedSpeech, TurnCallback,
};
pub use credentials::{CredentialProvider, EphemeralToken, HttpCredentialProvider};
pub use media::{AudioFrame, ChannelMediaSource, MediaFeed, MediaSource, MediaTrack};
pub use signaling::SignalingClient;
pub use transport::{
    ControlChannel, DiscardSink, PlaybackSink, Transport, TransportEvent, TransportEventSender,
    TransportFactory, TransportState,
};
pub use peer::{WebRtcTransport, WebRtcTransportFactory};
