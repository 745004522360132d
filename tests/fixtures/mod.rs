//! Test Fixtures Module
//!
//! In-memory collaborators for driving a `VoiceBridge` without a network:
//! - Credential provider with a scripted outcome
//! - Transport factory / transport / control channel that record traffic
//! - Text backend with scripted replies and an optional release gate
//! - Signaling endpoints (prompt or slow) served by wiremock

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voice_bridge::chat::{ChatRequest, FragmentStream, TextBackend};
use voice_bridge::realtime::{
    BridgeError, BridgeResult, ControlChannel, CredentialProvider, EphemeralToken, MediaTrack,
    Transport, TransportEvent, TransportEventSender, TransportFactory,
};
use voice_bridge::{BridgeConfig, ChannelMediaSource, VoiceBridge, VoiceBridgeBuilder};

pub const ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

// =============================================================================
// Credentials
// =============================================================================

pub struct FakeCredentials {
    outcome: Result<String, String>,
    stalled: bool,
    calls: AtomicUsize,
}

impl FakeCredentials {
    pub fn granting(secret: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(secret.to_string()),
            stalled: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(message.to_string()),
            stalled: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// A token route that never answers.
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            outcome: Err("unreachable".to_string()),
            stalled: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn fetch_token(&self) -> BridgeResult<EphemeralToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            std::future::pending::<()>().await;
        }
        match &self.outcome {
            Ok(secret) => Ok(EphemeralToken::new(secret.clone(), None)),
            Err(message) => Err(BridgeError::Credential(message.clone())),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every outbound message, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|raw| serde_json::from_str(raw).expect("outbound message is JSON"))
            .collect()
    }

    /// Outbound messages other than `session.update`.
    pub fn sent_conversation(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|m| m["type"] != "session.update")
            .collect()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn send_text(&self, text: String) -> BridgeResult<()> {
        if !self.is_open() {
            return Err(BridgeError::SynthesisDispatch("channel is not open".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeTransport {
    events: TransportEventSender,
    track: Mutex<Option<MediaTrack>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    answer: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().clone().expect("control channel created")
    }

    pub fn track(&self) -> Option<MediaTrack> {
        self.track.lock().clone()
    }

    pub fn answer(&self) -> Option<String> {
        self.answer.lock().clone()
    }

    /// Mark the channel open and report it, as the remote peer would.
    pub fn open_channel(&self) {
        self.channel().open.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::ChannelOpen);
    }

    /// Deliver one inbound control message.
    pub fn inject(&self, message: Value) {
        self.emit(TransportEvent::ChannelMessage(message.to_string()));
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn attach_track(&self, track: MediaTrack) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::Transport("transport closed".to_string()));
        }
        *self.track.lock() = Some(track);
        Ok(())
    }

    async fn create_control_channel(&self, label: &str) -> BridgeResult<Arc<dyn ControlChannel>> {
        let channel = Arc::new(FakeChannel::new(label));
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> BridgeResult<String> {
        Ok(OFFER_SDP.to_string())
    }

    async fn apply_answer(&self, sdp: String) -> BridgeResult<()> {
        *self.answer.lock() = Some(sdp);
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.channel.lock().clone() {
            channel.open.store(false, Ordering::SeqCst);
            channel.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.transports.lock().len()
    }

    /// The `index`-th transport created.
    pub fn nth(&self, index: usize) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .get(index)
            .cloned()
            .expect("transport was created")
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .last()
            .cloned()
            .expect("a transport was created")
    }

    /// Transports not yet closed.
    pub fn open_transports(&self) -> usize {
        self.transports.lock().iter().filter(|t| !t.is_closed()).count()
    }

    /// Control channels currently open.
    pub fn open_channels(&self) -> usize {
        self.transports
            .lock()
            .iter()
            .filter_map(|t| t.channel.lock().clone())
            .filter(|c| c.is_open())
            .count()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(&self, events: TransportEventSender) -> BridgeResult<Arc<dyn Transport>> {
        let transport = Arc::new(FakeTransport {
            events,
            track: Mutex::new(None),
            channel: Mutex::new(None),
            answer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

// =============================================================================
// Text backend
// =============================================================================

pub struct FakeBackend {
    replies: Mutex<VecDeque<Result<Vec<String>, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeBackend {
    /// Answer every request with the same fragments.
    pub fn replying(fragments: &[&str]) -> Arc<Self> {
        Self::scripted(vec![Ok(fragments.to_vec())], None)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Replies are handed out in order; the last one repeats. With a gate,
    /// each request waits for one permit before streaming.
    pub fn scripted(replies: Vec<Result<Vec<&str>, &str>>, gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        let replies = replies
            .into_iter()
            .map(|r| {
                r.map(|fragments| fragments.into_iter().map(str::to_string).collect())
                    .map_err(str::to_string)
            })
            .collect();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
            gate,
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    fn next_reply(&self) -> Result<Vec<String>, String> {
        let mut replies = self.replies.lock();
        if replies.len() > 1 {
            replies.pop_front().unwrap_or_else(|| Err("no reply scripted".to_string()))
        } else {
            replies
                .front()
                .cloned()
                .unwrap_or_else(|| Err("no reply scripted".to_string()))
        }
    }
}

#[async_trait]
impl TextBackend for FakeBackend {
    async fn generate(&self, request: ChatRequest) -> BridgeResult<FragmentStream> {
        self.requests.lock().push(request);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore is never closed")
                .forget();
        }
        match self.next_reply() {
            Ok(fragments) => Ok(futures_util::stream::iter(fragments.into_iter().map(Ok)).boxed()),
            Err(message) => Err(BridgeError::Backend(message)),
        }
    }
}

// =============================================================================
// Signaling and assembly
// =============================================================================

/// Signaling endpoint that answers its first `times` offers only after
/// `delay`, and every later offer at once.
pub async fn slow_signaling_server(delay: Duration, times: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_string(ANSWER_SDP)
                .set_delay(delay),
        )
        .up_to_n_times(times)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .mount(&server)
        .await;
    server
}

/// Signaling endpoint answering every offer with [`ANSWER_SDP`].
pub async fn signaling_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(header("content-type", "application/sdp"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .mount(&server)
        .await;
    server
}

pub fn test_config(signaling: &MockServer) -> BridgeConfig {
    BridgeConfig {
        signaling_url: format!("{}/v1/realtime", signaling.uri()),
        credential_timeout: Duration::from_secs(2),
        signaling_timeout: Duration::from_secs(2),
        backend_timeout: Duration::from_secs(2),
        ..BridgeConfig::default()
    }
}

pub struct Harness {
    pub bridge: VoiceBridge,
    pub media: Arc<ChannelMediaSource>,
    pub transports: Arc<FakeTransportFactory>,
    pub backend: Arc<FakeBackend>,
    pub signaling: MockServer,
}

pub async fn harness(backend: Arc<FakeBackend>) -> Harness {
    harness_with(FakeCredentials::granting("ek_test"), backend).await
}

pub async fn harness_with(credentials: Arc<FakeCredentials>, backend: Arc<FakeBackend>) -> Harness {
    harness_on(signaling_server().await, credentials, backend, |_| {})
}

/// Harness against `signaling`, with `tweak` applied to the test config.
pub fn harness_on(
    signaling: MockServer,
    credentials: Arc<FakeCredentials>,
    backend: Arc<FakeBackend>,
    tweak: impl FnOnce(&mut BridgeConfig),
) -> Harness {
    let mut config = test_config(&signaling);
    tweak(&mut config);
    let media = Arc::new(ChannelMediaSource::new());
    let transports = FakeTransportFactory::new();
    let bridge = VoiceBridgeBuilder::new(config)
        .credentials(credentials)
        .media(media.clone())
        .transport_factory(transports.clone())
        .backend(backend.clone())
        .build()
        .expect("bridge builds");
    Harness {
        bridge,
        media,
        transports,
        backend,
        signaling,
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn transcription(item_id: &str, transcript: &str) -> Value {
    serde_json::json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": item_id,
        "content_index": 0,
        "transcript": transcript
    })
}
