//! Cross-modal voice bridge.
//!
//! [`VoiceBridge`] owns the realtime session lifecycle (credential, media,
//! transport, signaling, teardown) and is the only place where the voice and
//! text modalities meet: completed user utterances go to the text backend,
//! and completed replies go back to the hosted model for speech synthesis.
//!
//! # Concurrency
//!
//! Every connection attempt gets a fresh [`SessionId`] and a
//! `CancellationToken`. Two tasks serve each session:
//!
//! - the event driver consumes [`TransportEvent`]s in arrival order;
//! - the turn worker answers user utterances strictly one at a time.
//!
//! Both re-check that their session is still the current one (under the
//! session lock) before touching shared state, so results that arrive after
//! `disconnect()` are discarded even if a new session was started since.
//!
//! State changes and transcript appends publish their event while the
//! session lock is held, and events reach the callbacks one at a time in
//! publication order.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voice_bridge::{BridgeConfig, ChannelMediaSource, ConversationTurn, VoiceBridgeBuilder};
//!
//! let media = Arc::new(ChannelMediaSource::new());
//! let bridge = VoiceBridgeBuilder::new(BridgeConfig::from_env()?)
//!     .media(media.clone())
//!     .build()?;
//!
//! bridge.on_turn(Arc::new(|turn: ConversationTurn| Box::pin(async move {
//!     println!("[{}/{}] {}", turn.role, turn.origin, turn.content);
//! })));
//!
//! bridge.connect().await?;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::core::chat::{ChatRequest, HttpTextBackend, TextBackend, collect_reply};
use crate::core::realtime::base::{
    BridgeError, BridgeErrorCallback, BridgeResult, ConnectionState, SessionId,
    SpeechSynthesizedCallback, StateChangeCallback, SynthesizedSpeech, TurnCallback,
};
use crate::core::realtime::credentials::{CredentialProvider, HttpCredentialProvider};
use crate::core::realtime::media::{MediaSource, MediaTrack};
use crate::core::realtime::openai::{
    ControlEvent, decode, encode_session_update, encode_synthesis_request,
};
use crate::core::realtime::signaling::SignalingClient;
use crate::core::realtime::transport::{
    ControlChannel, Transport, TransportEvent, TransportFactory, TransportState,
};
use crate::core::realtime::peer::WebRtcTransportFactory;
use crate::core::transcript::{ConversationTurn, Origin, Role, TranscriptStore};

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`VoiceBridge`].
///
/// Only the media source is required. Every other collaborator defaults to
/// the HTTP / WebRTC implementation derived from the configuration.
pub struct VoiceBridgeBuilder {
    config: BridgeConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    media: Option<Arc<dyn MediaSource>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    signaling: Option<SignalingClient>,
    backend: Option<Arc<dyn TextBackend>>,
    transcript: Option<Arc<TranscriptStore>>,
}

impl VoiceBridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            credentials: None,
            media: None,
            transport_factory: None,
            signaling: None,
            backend: None,
            transcript: None,
        }
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn media(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media = Some(source);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn signaling(mut self, client: SignalingClient) -> Self {
        self.signaling = Some(client);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Share an existing transcript, e.g. one already holding a welcome turn.
    pub fn transcript(mut self, transcript: Arc<TranscriptStore>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn build(self) -> BridgeResult<VoiceBridge> {
        let config = self.config;
        let media = self
            .media
            .ok_or_else(|| BridgeError::Media("no media source configured".to_string()))?;

        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(
                HttpCredentialProvider::new(config.credential_url.clone())
                    .with_timeout(config.credential_timeout),
            )
        });
        let transport_factory = self.transport_factory.unwrap_or_else(|| {
            Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone()))
        });
        let signaling = self.signaling.unwrap_or_else(|| {
            SignalingClient::new(config.signaling_url.clone())
                .with_model(config.model.clone())
                .with_timeout(config.signaling_timeout)
        });
        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(
                HttpTextBackend::new(config.chat_url.clone())
                    .with_connect_timeout(config.backend_timeout),
            )
        });
        let transcript = self.transcript.unwrap_or_default();

        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Ok(VoiceBridge {
            inner: Arc::new(BridgeInner {
                config,
                credentials,
                media,
                transport_factory,
                signaling,
                backend,
                transcript,
                connect_lock: tokio::sync::Mutex::new(()),
                session: Mutex::new(None),
                state: state_tx,
                recording: AtomicBool::new(false),
                intro_checked: AtomicBool::new(false),
                next_session: AtomicU64::new(0),
                last_failure: Mutex::new(None),
                events: EventQueue::default(),
            }),
        })
    }
}


// =============================================================================
// Session
// =============================================================================

/// A user utterance waiting for its reply.
#[derive(Debug, Clone, Copy)]
struct PendingTurn {
    sequence: u64,
}

/// Resources exclusively owned by one connection attempt.
struct Session {
    id: SessionId,
    cancel: CancellationToken,
    track: Option<MediaTrack>,
    transport: Option<Arc<dyn Transport>>,
    channel: Option<Arc<dyn ControlChannel>>,
    turns: Option<mpsc::UnboundedSender<PendingTurn>>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            track: None,
            transport: None,
            channel: None,
            turns: None,
        }
    }

    /// Stop the track, close the channel, close the transport.
    async fn release(self) {
        self.cancel.cancel();
        if let Some(track) = &self.track {
            track.stop();
        }
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.close().await {
                debug!(session = %self.id, "Control channel close failed: {}", e);
            }
        }
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.close().await {
                debug!(session = %self.id, "Transport close failed: {}", e);
            }
        }
        debug!(session = %self.id, "Session resources released");
    }
}

// =============================================================================
// Events
// =============================================================================

enum BridgeEvent {
    State(ConnectionState),
    Turn(ConversationTurn),
    Error(BridgeError),
    Speech(SynthesizedSpeech),
}

tokio::task_local! {
    static DELIVERING: ();
}

#[derive(Default)]
struct Callbacks {
    state: RwLock<Option<StateChangeCallback>>,
    turn: RwLock<Option<TurnCallback>>,
    error: RwLock<Option<BridgeErrorCallback>>,
    speech: RwLock<Option<SpeechSynthesizedCallback>>,
}

/// Callback registry plus the queue of events not yet handed out.
#[derive(Default)]
struct EventQueue {
    callbacks: Callbacks,
    pending: Mutex<VecDeque<BridgeEvent>>,
    delivery: tokio::sync::Mutex<()>,
}

impl EventQueue {
    fn publish(&self, event: BridgeEvent) {
        self.pending.lock().push_back(event);
    }

    /// Deliver everything published so far, one event at a time.
    ///
    /// Events published from inside a callback are only queued; the
    /// enclosing delivery loop hands them out once that callback returns.
    async fn flush(&self) {
        if DELIVERING.try_with(|_| ()).is_ok() {
            return;
        }
        let _delivery = self.delivery.lock().await;
        loop {
            let next = self.pending.lock().pop_front();
            let Some(event) = next else {
                break;
            };
            DELIVERING.scope((), self.deliver(event)).await;
        }
    }

    async fn deliver(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::State(state) => {
                let callback = self.callbacks.state.read().clone();
                if let Some(callback) = callback {
                    callback(state).await;
                }
            }
            BridgeEvent::Turn(turn) => {
                let callback = self.callbacks.turn.read().clone();
                if let Some(callback) = callback {
                    callback(turn).await;
                }
            }
            BridgeEvent::Error(err) => {
                let callback = self.callbacks.error.read().clone();
                if let Some(callback) = callback {
                    callback(err).await;
                }
            }
            BridgeEvent::Speech(speech) => {
                let callback = self.callbacks.speech.read().clone();
                if let Some(callback) = callback {
                    callback(speech).await;
                }
            }
        }
    }
}

// =============================================================================
// Bridge internals
// =============================================================================

struct BridgeInner {
    config: BridgeConfig,
    credentials: Arc<dyn CredentialProvider>,
    media: Arc<dyn MediaSource>,
    transport_factory: Arc<dyn TransportFactory>,
    signaling: SignalingClient,
    backend: Arc<dyn TextBackend>,
    transcript: Arc<TranscriptStore>,
    connect_lock: tokio::sync::Mutex<()>,
    session: Mutex<Option<Session>>,
    state: watch::Sender<ConnectionState>,
    recording: AtomicBool,
    /// Set by the first session that reaches `connected`
    intro_checked: AtomicBool,
    next_session: AtomicU64,
    /// Terminal error of the most recently failed session
    last_failure: Mutex<Option<(SessionId, BridgeError)>>,
    events: EventQueue,
}

fn cancelled() -> BridgeError {
    BridgeError::Transport("connection attempt cancelled".to_string())
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = BridgeResult<T>>,
) -> BridgeResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = fut => result,
    }
}

impl BridgeInner {
    // -------------------------------------------------------------------------
    // State and events
    // -------------------------------------------------------------------------

    /// Move to `state` and publish the change. Call with the session lock held.
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(state = %state, "Connection state changed");
            self.events.publish(BridgeEvent::State(state));
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session.lock().as_ref().map(|s| s.id) == Some(id)
    }

    /// Run `f` on the session if `id` is still current.
    fn with_session(&self, id: SessionId, f: impl FnOnce(&mut Session)) -> bool {
        let mut slot = self.session.lock();
        match slot.as_mut() {
            Some(session) if session.id == id => {
                f(session);
                true
            }
            _ => false,
        }
    }

    /// Append a turn and publish it. Call with the session lock held so
    /// turn events are published in sequence order.
    fn record_turn(&self, role: Role, origin: Origin, content: String) -> ConversationTurn {
        let turn = self.transcript.append(role, origin, content);
        debug!(
            sequence = turn.sequence,
            role = %turn.role,
            origin = %turn.origin,
            "Turn appended"
        );
        self.events.publish(BridgeEvent::Turn(turn.clone()));
        turn
    }

    fn publish_error(&self, err: BridgeError) {
        if err.is_terminal() {
            error!(kind = %err.kind(), "{}", err);
        } else {
            warn!(kind = %err.kind(), "{}", err);
        }
        self.events.publish(BridgeEvent::Error(err));
    }

    async fn emit_error(&self, err: BridgeError) {
        self.publish_error(err);
        self.events.flush().await;
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Detach the session and move to `final_state`, reporting `failure`.
    ///
    /// With `expected` set, nothing happens unless that session is still the
    /// current one. Returns whether the teardown ran.
    async fn teardown(
        &self,
        expected: Option<SessionId>,
        final_state: ConnectionState,
        failure: Option<BridgeError>,
    ) -> bool {
        let session = {
            let mut slot = self.session.lock();
            if let Some(id) = expected {
                if slot.as_ref().map(|s| s.id) != Some(id) {
                    return false;
                }
            }
            let session = slot.take();
            if let Some(session) = &session {
                if let Some(err) = &failure {
                    *self.last_failure.lock() = Some((session.id, err.clone()));
                }
                session.cancel.cancel();
            }
            self.recording.store(false, Ordering::Release);
            self.set_state(final_state);
            if let Some(err) = failure {
                self.publish_error(err);
            }
            session
        };

        if let Some(session) = session {
            info!(session = %session.id, state = %final_state, "Tearing down session");
            session.release().await;
        }
        self.events.flush().await;
        true
    }

    async fn end_session(&self, expected: Option<SessionId>) -> bool {
        self.teardown(expected, ConnectionState::Closed, None).await
    }

    /// Terminal failure of session `id`: release it, go to `failed`, report.
    async fn fail(&self, id: SessionId, err: BridgeError) {
        self.teardown(Some(id), ConnectionState::Failed, Some(err)).await;
    }

    /// The terminal error recorded for session `id`, if it failed.
    fn take_failure(&self, id: SessionId) -> Option<BridgeError> {
        self.last_failure
            .lock()
            .take_if(|(failed, _)| *failed == id)
            .map(|(_, err)| err)
    }

    async fn connect(self: &Arc<Self>) -> BridgeResult<()> {
        let has_previous = self.session.lock().is_some();
        if has_previous {
            self.end_session(None).await;
        }

        let _guard = self.connect_lock.lock().await;

        let id = SessionId(self.next_session.fetch_add(1, Ordering::AcqRel) + 1);
        let session = Session::new(id);
        let cancel = session.cancel.clone();
        {
            let mut slot = self.session.lock();
            *slot = Some(session);
            self.set_state(ConnectionState::Connecting);
        }
        info!(session = %id, "Connecting realtime session");
        self.events.flush().await;

        match self.establish(id, &cancel).await {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => match self.take_failure(id) {
                Some(failure) => Err(failure),
                None => {
                    info!(session = %id, "Connection attempt superseded");
                    Ok(())
                }
            },
            Err(err) => {
                self.fail(id, err.clone()).await;
                self.take_failure(id);
                Err(err)
            }
        }
    }

    async fn establish(self: &Arc<Self>, id: SessionId, cancel: &CancellationToken) -> BridgeResult<()> {
        let credential_timeout = self.config.credential_timeout;
        let token = cancellable(cancel, async {
            tokio::time::timeout(credential_timeout, self.credentials.fetch_token())
                .await
                .map_err(|_| {
                    BridgeError::Credential(format!(
                        "credential fetch timed out after {}ms",
                        credential_timeout.as_millis()
                    ))
                })?
        })
        .await?;
        debug!(session = %id, expires_at = ?token.expires_at(), "Realtime token acquired");

        let track = cancellable(cancel, self.media.acquire()).await?;
        if !self.with_session(id, |s| s.track = Some(track.clone())) {
            track.stop();
            return Err(cancelled());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = cancellable(cancel, self.transport_factory.create(events_tx)).await?;
        if !self.with_session(id, |s| s.transport = Some(transport.clone())) {
            let _ = transport.close().await;
            return Err(cancelled());
        }

        transport.attach_track(track.clone()).await?;
        let channel = transport
            .create_control_channel(&self.config.control_channel_label)
            .await?;

        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let installed = self.with_session(id, |s| {
            s.channel = Some(channel.clone());
            s.turns = Some(turn_tx);
        });
        if !installed {
            let _ = channel.close().await;
            return Err(cancelled());
        }

        tokio::spawn(self.clone().drive_events(id, cancel.clone(), events_rx));
        tokio::spawn(self.clone().process_turns(id, cancel.clone(), turn_rx));

        let signaling_timeout = self.config.signaling_timeout;
        let handshake = async {
            let offer = transport.create_offer().await?;
            let answer = self.signaling.exchange(&offer, &token).await?;
            transport.apply_answer(answer).await
        };
        cancellable(cancel, async {
            tokio::time::timeout(signaling_timeout, handshake)
                .await
                .map_err(|_| {
                    BridgeError::Signaling(format!(
                        "handshake timed out after {}ms",
                        signaling_timeout.as_millis()
                    ))
                })?
        })
        .await?;

        info!(session = %id, "Signaling complete, waiting for control channel");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Event driver
    // -------------------------------------------------------------------------

    async fn drive_events(
        self: Arc<Self>,
        id: SessionId,
        cancel: CancellationToken,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                TransportEvent::ChannelOpen => self.on_channel_open(id).await,
                TransportEvent::ChannelClosed => {
                    self.end_session(Some(id)).await;
                }
                TransportEvent::StateChanged(TransportState::Failed) => {
                    self.fail(id, BridgeError::Transport("peer connection failed".to_string()))
                        .await;
                }
                TransportEvent::StateChanged(TransportState::Closed) => {
                    self.end_session(Some(id)).await;
                }
                TransportEvent::StateChanged(state) => {
                    debug!(session = %id, state = %state, "Transport state");
                }
                TransportEvent::RemoteTrack { id: track_id } => {
                    info!(session = %id, track_id = %track_id, "Remote audio attached to playback");
                }
                TransportEvent::ChannelMessage(raw) => self.on_control_message(id, &raw).await,
                TransportEvent::ChannelError(message) => {
                    if self.is_current(id) {
                        self.emit_error(BridgeError::protocol(None, message)).await;
                    }
                }
            }
        }
        debug!(session = %id, "Event driver stopped");
    }

    async fn on_channel_open(&self, id: SessionId) {
        let channel = {
            let slot = self.session.lock();
            let Some(session) = slot.as_ref().filter(|s| s.id == id) else {
                return;
            };
            if self.current_state() != ConnectionState::Connecting {
                return;
            }
            self.set_state(ConnectionState::Connected);
            self.recording.store(true, Ordering::Release);
            if let Some(track) = &session.track {
                track.set_enabled(true);
            }
            session.channel.clone()
        };
        self.events.flush().await;

        if let Some(channel) = channel {
            let update = encode_session_update(
                &self.config.transcription_model,
                self.config.voice.as_deref(),
                self.config.instructions.as_deref(),
            );
            match update {
                Ok(message) => {
                    if let Err(e) = channel.send_text(message).await {
                        warn!(session = %id, "Failed to send session.update: {}", e);
                    }
                }
                Err(e) => warn!(session = %id, "Failed to encode session.update: {}", e),
            }
        }

        // Only the first session to open speaks a waiting assistant turn
        if self.intro_checked.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(intro) = self.transcript.trailing_assistant_turn() {
            info!(session = %id, sequence = intro.sequence, "Speaking existing assistant turn");
            if let Err(e) = self.dispatch_synthesis(Some(id), &intro.content).await {
                self.emit_error(e).await;
            }
        }
    }

    async fn on_control_message(&self, id: SessionId, raw: &str) {
        match decode(raw) {
            Ok(Some(ControlEvent::SpeechTranscribed {
                item_id,
                transcript,
            })) => self.on_speech_transcribed(id, &item_id, transcript).await,
            Ok(Some(ControlEvent::SynthesisTranscriptDone {
                response_id,
                transcript,
                ..
            })) => {
                debug!(session = %id, response_id = %response_id, "Assistant said: {}", transcript);
                if self.is_current(id) {
                    self.events.publish(BridgeEvent::Speech(SynthesizedSpeech {
                        response_id: Some(response_id),
                        transcript,
                    }));
                    self.events.flush().await;
                }
            }
            Ok(Some(ControlEvent::ProtocolError { code, message })) => {
                if self.is_current(id) {
                    self.emit_error(BridgeError::Protocol { code, message }).await;
                }
            }
            Ok(None) => trace!(session = %id, "Ignoring control event"),
            Err(e) => {
                if self.is_current(id) {
                    self.emit_error(e.into()).await;
                }
            }
        }
    }

    /// Record the utterance and queue it for a reply.
    ///
    /// Blank utterances are recorded but never sent to the backend.
    async fn on_speech_transcribed(&self, id: SessionId, item_id: &str, transcript: String) {
        let blank = transcript.trim().is_empty();
        let sequence = {
            let slot = self.session.lock();
            let Some(session) = slot.as_ref().filter(|s| s.id == id) else {
                return;
            };
            let turn = self.record_turn(Role::User, Origin::Voice, transcript);
            let queued = !blank
                && session
                    .turns
                    .as_ref()
                    .is_some_and(|tx| tx.send(PendingTurn { sequence: turn.sequence }).is_ok());
            if !blank && !queued {
                debug!(session = %id, sequence = turn.sequence, "Turn worker gone, no reply");
            }
            turn.sequence
        };
        if blank {
            debug!(session = %id, item_id = %item_id, sequence, "Blank utterance, no reply requested");
        } else {
            info!(session = %id, item_id = %item_id, sequence, "User utterance transcribed");
        }
        self.events.flush().await;
    }

    // -------------------------------------------------------------------------
    // Turn worker
    // -------------------------------------------------------------------------

    async fn process_turns(
        self: Arc<Self>,
        id: SessionId,
        cancel: CancellationToken,
        mut turns: mpsc::UnboundedReceiver<PendingTurn>,
    ) {
        loop {
            let turn = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                turn = turns.recv() => match turn {
                    Some(turn) => turn,
                    None => break,
                },
            };

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(session = %id, sequence = turn.sequence, "Discarding in-flight reply");
                    break;
                }
                reply = self.generate_reply(turn.sequence, true) => reply,
            };

            match reply {
                Ok(text) => self.deliver_voice_reply(id, &cancel, text).await,
                Err(e) => {
                    if self.is_current(id) {
                        self.emit_error(e).await;
                    }
                }
            }
        }
        debug!(session = %id, "Turn worker stopped");
    }

    /// Ask the backend to answer user turn `sequence`, given the
    /// conversation as it stands now.
    async fn generate_reply(&self, sequence: u64, voice_mode: bool) -> BridgeResult<String> {
        let history = self.transcript.reply_context(sequence);
        let request = ChatRequest::from_turns(&history, voice_mode).with_context(
            self.config.user_id.clone(),
            self.config.conversation_id.clone(),
        );

        let timeout = self.config.backend_timeout;
        tokio::time::timeout(timeout, async {
            let stream = self.backend.generate(request).await?;
            collect_reply(stream).await
        })
        .await
        .map_err(|_| {
            BridgeError::Backend(format!(
                "reply did not complete within {}ms",
                timeout.as_millis()
            ))
        })?
    }

    async fn deliver_voice_reply(&self, id: SessionId, cancel: &CancellationToken, text: String) {
        let content = {
            let slot = self.session.lock();
            if cancel.is_cancelled() || slot.as_ref().map(|s| s.id) != Some(id) {
                debug!(session = %id, "Session ended, dropping reply");
                return;
            }
            self.record_turn(Role::Assistant, Origin::Voice, text).content
        };
        self.events.flush().await;

        if let Err(e) = self.dispatch_synthesis(Some(id), &content).await {
            if self.is_current(id) {
                self.emit_error(e).await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Synthesis
    // -------------------------------------------------------------------------

    /// Send the two-step synthesis request for `text`.
    ///
    /// Requires a connected session (the one named by `expected`, if any)
    /// with an open control channel.
    async fn dispatch_synthesis(&self, expected: Option<SessionId>, text: &str) -> BridgeResult<()> {
        let channel = {
            let slot = self.session.lock();
            slot.as_ref()
                .filter(|s| expected.is_none_or(|id| s.id == id))
                .filter(|_| self.current_state() == ConnectionState::Connected)
                .and_then(|s| s.channel.clone())
        };
        let Some(channel) = channel.filter(|c| c.is_open()) else {
            return Err(BridgeError::SynthesisDispatch(
                "control channel is not open; reply will not be spoken".to_string(),
            ));
        };

        let [item, response] =
            encode_synthesis_request(text, &self.config.synthesis_instructions)
                .map_err(|e| BridgeError::SynthesisDispatch(e.to_string()))?;

        let as_dispatch = |e: BridgeError| match e {
            BridgeError::SynthesisDispatch(_) => e,
            other => BridgeError::SynthesisDispatch(other.to_string()),
        };
        channel.send_text(item).await.map_err(as_dispatch)?;
        channel.send_text(response).await.map_err(as_dispatch)?;

        debug!(chars = text.len(), "Synthesis requested");
        Ok(())
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Realtime voice conversation bridge.
pub struct VoiceBridge {
    inner: Arc<BridgeInner>,
}

impl VoiceBridge {
    /// Bring up a new realtime session, tearing down any existing one first.
    ///
    /// Resolves once signaling is complete; the session becomes `connected`
    /// when the control channel opens. Failures are also reported through
    /// the error callback and leave the state `failed`. An attempt replaced
    /// by a later `connect()` or `disconnect()` resolves to `Ok(())`.
    pub async fn connect(&self) -> BridgeResult<()> {
        self.inner.connect().await
    }

    /// Release the microphone, channel and transport. Safe from any state.
    pub async fn disconnect(&self) {
        self.inner.end_session(None).await;
    }

    /// Speak `text` outside the normal voice-turn flow.
    ///
    /// Only effective while connected; otherwise a
    /// `BridgeError::SynthesisDispatch` is reported and returned. No turn is
    /// appended to the transcript.
    pub async fn send_text(&self, text: &str) -> BridgeResult<()> {
        let result = self.inner.dispatch_synthesis(None, text).await;
        if let Err(e) = &result {
            self.inner.emit_error(e.clone()).await;
        }
        result
    }

    /// Submit a typed message through the text backend.
    ///
    /// Appends a `user/text` turn, then the `assistant/text` reply. These
    /// replies are never synthesized. Works with or without a voice session.
    pub async fn submit_text_turn(&self, text: &str) -> BridgeResult<ConversationTurn> {
        let inner = &self.inner;
        let sequence = {
            let _order = inner.session.lock();
            inner
                .record_turn(Role::User, Origin::Text, text.to_string())
                .sequence
        };
        inner.events.flush().await;

        match inner.generate_reply(sequence, false).await {
            Ok(reply) => {
                let turn = {
                    let _order = inner.session.lock();
                    inner.record_turn(Role::Assistant, Origin::Text, reply)
                };
                inner.events.flush().await;
                Ok(turn)
            }
            Err(e) => {
                inner.emit_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Mute or unmute the live microphone track.
    ///
    /// Only a connected session has a track to toggle; otherwise recording
    /// stays off. Returns the new recording state.
    pub fn toggle_recording(&self) -> bool {
        let slot = self.inner.session.lock();
        let track = slot
            .as_ref()
            .filter(|_| self.inner.current_state() == ConnectionState::Connected)
            .and_then(|s| s.track.as_ref());
        let Some(track) = track else {
            debug!("No live microphone track to toggle");
            return false;
        };
        let recording = !self.inner.recording.fetch_xor(true, Ordering::AcqRel);
        track.set_enabled(recording);
        info!(recording, "Recording toggled");
        recording
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::Acquire)
    }

    pub fn transcript(&self) -> Arc<TranscriptStore> {
        self.inner.transcript.clone()
    }

    /// Identity of the current session, if one exists.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session.lock().as_ref().map(|s| s.id)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn on_state_change(&self, callback: StateChangeCallback) {
        *self.inner.events.callbacks.state.write() = Some(callback);
    }

    pub fn on_turn(&self, callback: TurnCallback) {
        *self.inner.events.callbacks.turn.write() = Some(callback);
    }

    pub fn on_error(&self, callback: BridgeErrorCallback) {
        *self.inner.events.callbacks.error.write() = Some(callback);
    }

    pub fn on_speech_synthesized(&self, callback: SpeechSynthesizedCallback) {
        *self.inner.events.callbacks.speech.write() = Some(callback);
    }
}

impl Drop for VoiceBridge {
    fn drop(&mut self) {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            if let Some(track) = &session.track {
                track.stop();
            }
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(session.release());
            }
        }
    }
}
