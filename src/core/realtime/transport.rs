//! Transport abstraction for the realtime session.
//!
//! A [`Transport`] is one peer connection carrying the local microphone
//! track out, remote synthesized audio in, and a single control channel.
//! Everything the transport observes is reported as a [`TransportEvent`] on
//! the channel handed to [`TransportFactory::create`], which keeps the
//! bridge logic free of transport callbacks and testable without a network.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::base::BridgeResult;
use super::media::MediaTrack;

/// Peer-connection level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Everything a transport reports back to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    /// Remote audio arrived and was attached to the playback sink
    RemoteTrack { id: String },
    ChannelOpen,
    ChannelClosed,
    /// One text message received on the control channel
    ChannelMessage(String),
    ChannelError(String),
}

/// Sender half used by transports to report events.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// The control data channel of a session.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Whether outbound messages may be sent right now.
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> BridgeResult<()>;

    async fn close(&self) -> BridgeResult<()>;
}

/// One peer connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start sending `track` to the remote peer.
    async fn attach_track(&self, track: MediaTrack) -> BridgeResult<()>;

    async fn create_control_channel(&self, label: &str) -> BridgeResult<Arc<dyn ControlChannel>>;

    /// Create the local offer and return its SDP.
    async fn create_offer(&self) -> BridgeResult<String>;

    /// Apply the remote answer SDP.
    async fn apply_answer(&self, sdp: String) -> BridgeResult<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> BridgeResult<()>;
}

/// Creates one transport per connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, events: TransportEventSender) -> BridgeResult<Arc<dyn Transport>>;
}

/// Receives inbound synthesized audio.
pub trait PlaybackSink: Send + Sync {
    /// Called for every payload of remote track `track_id`, in arrival order.
    fn play(&self, track_id: &str, payload: Bytes);
}

/// Sink that drops all remote audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl PlaybackSink for DiscardSink {
    fn play(&self, _track_id: &str, _payload: Bytes) {}
}
