//! WebRTC transport backed by the `webrtc` crate.
//!
//! One [`WebRtcTransport`] wraps one `RTCPeerConnection`. The local
//! microphone is sent as an Opus track, remote audio is handed to a
//! [`PlaybackSink`] as soon as the track arrives, and the control data
//! channel reports through the session's event sender.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::base::{BridgeError, BridgeResult};
use super::media::MediaTrack;
use super::transport::{
    ControlChannel, DiscardSink, PlaybackSink, Transport, TransportEvent, TransportEventSender,
    TransportFactory, TransportState,
};

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                TransportState::New
            }
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
        }
    }
}

fn transport_error(context: &str, err: webrtc::Error) -> BridgeError {
    BridgeError::Transport(format!("{context}: {err}"))
}

/// Creates WebRTC peer connections.
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
    sink: Arc<dyn PlaybackSink>,
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            sink: Arc::new(DiscardSink),
        }
    }

    /// Route inbound synthesized audio to `sink`.
    pub fn with_playback_sink(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, events: TransportEventSender) -> BridgeResult<Arc<dyn Transport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| transport_error("failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| transport_error("failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| transport_error("failed to create peer connection", e))?,
        );

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let state = TransportState::from(state);
            info!(state = %state, "Peer connection state changed");
            let _ = state_events.send(TransportEvent::StateChanged(state));
            Box::pin(async {})
        }));

        let track_events = events.clone();
        let sink = self.sink.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            let sink = sink.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                let id = track.id();
                info!(
                    track_id = %id,
                    codec = %track.codec().capability.mime_type,
                    "Remote audio track received"
                );
                let _ = events.send(TransportEvent::RemoteTrack { id: id.clone() });
                tokio::spawn(play_remote_track(track, id, sink));
            })
        }));

        Ok(Arc::new(WebRtcTransport {
            pc,
            events,
            pump_cancel: CancellationToken::new(),
            channel: Mutex::new(None),
        }))
    }
}

async fn play_remote_track(track: Arc<TrackRemote>, id: String, sink: Arc<dyn PlaybackSink>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if !packet.payload.is_empty() {
                    sink.play(&id, packet.payload);
                }
            }
            Err(e) => {
                debug!(track_id = %id, "Remote track ended: {}", e);
                break;
            }
        }
    }
}

/// One WebRTC peer connection with a single control channel.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: TransportEventSender,
    pump_cancel: CancellationToken,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
}

impl WebRtcTransport {
    fn register_channel_handlers(&self, dc: &Arc<RTCDataChannel>) {
        let events = self.events.clone();
        dc.on_open(Box::new(move || {
            info!("Control channel opened");
            let _ = events.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }));

        let events = self.events.clone();
        dc.on_close(Box::new(move || {
            info!("Control channel closed");
            let _ = events.send(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }));

        let events = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::ChannelMessage(text));
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::ChannelError(format!(
                            "control message is not UTF-8: {e}"
                        )));
                    }
                }
            } else {
                trace!(len = msg.data.len(), "Ignoring binary control message");
            }
            Box::pin(async {})
        }));

        let events = self.events.clone();
        dc.on_error(Box::new(move |err| {
            warn!("Control channel error: {}", err);
            let _ = events.send(TransportEvent::ChannelError(err.to_string()));
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn attach_track(&self, track: MediaTrack) -> BridgeResult<()> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            "voice-bridge".to_owned(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| transport_error("failed to add local track", e))?;

        // RTCP must be drained for interceptors to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let cancel = self.pump_cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = track.next_frame() => frame,
                };
                let Some(frame) = frame else { break };
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = local.write_sample(&sample).await {
                    warn!("Failed to write audio sample: {}", e);
                }
            }
            debug!(track_id = %track.id(), "Outbound audio pump stopped");
        });

        Ok(())
    }

    async fn create_control_channel(&self, label: &str) -> BridgeResult<Arc<dyn ControlChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| transport_error("failed to create data channel", e))?;

        self.register_channel_handlers(&dc);
        *self.channel.lock() = Some(dc.clone());

        Ok(Arc::new(WebRtcControlChannel {
            label: label.to_string(),
            dc,
        }))
    }

    async fn create_offer(&self) -> BridgeResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to create offer: {e}")))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to set local description: {e}")))?;
        let _ = gather_complete.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| BridgeError::Signaling("local description missing".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> BridgeResult<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| BridgeError::Signaling(format!("malformed answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to apply answer: {e}")))
    }

    async fn close(&self) -> BridgeResult<()> {
        self.pump_cancel.cancel();
        let channel = self.channel.lock().take();
        if let Some(dc) = channel {
            let _ = dc.close().await;
        }
        self.pc
            .close()
            .await
            .map_err(|e| transport_error("failed to close peer connection", e))
    }
}

struct WebRtcControlChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for WebRtcControlChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> BridgeResult<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| BridgeError::SynthesisDispatch(format!("control channel send failed: {e}")))
    }

    async fn close(&self) -> BridgeResult<()> {
        self.dc
            .close()
            .await
            .map_err(|e| transport_error("failed to close control channel", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_mapping() {
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Failed),
            TransportState::Failed
        );
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Unspecified),
            TransportState::New
        );
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Closed),
            TransportState::Closed
        );
    }

    #[tokio::test]
    async fn test_offer_contains_audio_and_data_channel() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = WebRtcTransportFactory::default().create(tx).await.unwrap();

        let source = crate::core::realtime::media::ChannelMediaSource::new();
        let track = crate::core::realtime::media::MediaSource::acquire(&source)
            .await
            .unwrap();
        transport.attach_track(track.clone()).await.unwrap();
        let channel = transport.create_control_channel("oai-events").await.unwrap();
        assert!(!channel.is_open());

        let sdp = transport.create_offer().await.unwrap();
        assert!(sdp.starts_with("v=0"));
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("m=application"));

        transport.close().await.unwrap();
        track.stop();
    }
}
