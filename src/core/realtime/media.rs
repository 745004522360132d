//! Media Acquisition.
//!
//! A [`MediaSource`] hands out one [`MediaTrack`] per session. The track can
//! be muted and unmuted without reacquiring the device, and must be stopped
//! on teardown so the microphone is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::base::{BridgeError, BridgeResult};

/// Default capacity of the capture queue between the feed and the track.
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// One encoded (Opus) audio frame captured from the microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            data: data.into(),
            duration,
        }
    }
}

struct TrackInner {
    id: String,
    enabled: Arc<AtomicBool>,
    released: AtomicBool,
    stopped: CancellationToken,
    frames: tokio::sync::Mutex<mpsc::Receiver<AudioFrame>>,
    live_counter: Option<Arc<AtomicUsize>>,
}

impl TrackInner {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.enabled.store(false, Ordering::Release);
        self.stopped.cancel();
        if let Some(counter) = &self.live_counter {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        true
    }
}

impl Drop for TrackInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to one acquired microphone track.
///
/// Clones share the same underlying track. A new track starts disabled.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

impl MediaTrack {
    fn with_counter(
        id: impl Into<String>,
        frames: mpsc::Receiver<AudioFrame>,
        live_counter: Option<Arc<AtomicUsize>>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                enabled: Arc::new(AtomicBool::new(false)),
                released: AtomicBool::new(false),
                stopped: CancellationToken::new(),
                frames: tokio::sync::Mutex::new(frames),
                live_counter,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Enable or mute the outbound audio. Ignored once stopped.
    pub fn set_enabled(&self, enabled: bool) {
        if self.is_live() {
            self.inner.enabled.store(enabled, Ordering::Release);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Whether the device is still held by this track.
    pub fn is_live(&self) -> bool {
        !self.inner.released.load(Ordering::Acquire)
    }

    /// Release the device. Idempotent.
    pub fn stop(&self) {
        if self.inner.release() {
            debug!(track_id = %self.inner.id, "Media track stopped");
        }
    }

    /// Next frame to transmit.
    ///
    /// Frames are dropped while the track is disabled, so no audio leaves
    /// the process while muted. Returns `None` once the track is stopped or
    /// the capture side is gone.
    pub async fn next_frame(&self) -> Option<AudioFrame> {
        let mut frames = self.inner.frames.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = self.inner.stopped.cancelled() => return None,
                frame = frames.recv() => match frame {
                    Some(frame) if self.is_enabled() => return Some(frame),
                    Some(_) => trace!(track_id = %self.inner.id, "Dropping frame captured while muted"),
                    None => return None,
                },
            }
        }
    }
}

/// Acquires microphone tracks.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a new track. Permission denial or an unavailable device is a
    /// `BridgeError::Media`.
    async fn acquire(&self) -> BridgeResult<MediaTrack>;
}

type FeedSlot = Arc<Mutex<Option<(mpsc::Sender<AudioFrame>, Arc<AtomicBool>)>>>;

/// In-process media source fed by the host application.
///
/// The host captures and encodes audio however it likes and pushes frames
/// through a [`MediaFeed`]. Only the most recently acquired track receives
/// frames.
pub struct ChannelMediaSource {
    current: FeedSlot,
    live: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    permission_granted: AtomicBool,
    capacity: usize,
}

impl Default for ChannelMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMediaSource {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            live: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
            permission_granted: AtomicBool::new(true),
            capacity: capacity.max(1),
        }
    }

    /// Handle used by the host to push captured frames.
    pub fn feed(&self) -> MediaFeed {
        MediaFeed {
            current: self.current.clone(),
        }
    }

    /// Grant or revoke microphone permission for future acquisitions.
    pub fn set_permission(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::Release);
    }

    /// Number of tracks acquired and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total number of successful acquisitions.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MediaSource for ChannelMediaSource {
    async fn acquire(&self) -> BridgeResult<MediaTrack> {
        if !self.permission_granted.load(Ordering::Acquire) {
            return Err(BridgeError::Media(
                "microphone permission denied".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let id = format!("mic-{}", uuid::Uuid::new_v4());
        self.live.fetch_add(1, Ordering::AcqRel);
        let track = MediaTrack::with_counter(id, rx, Some(self.live.clone()));
        *self.current.lock() = Some((tx, track.inner.enabled.clone()));

        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        debug!(track_id = %track.id(), "Microphone track acquired");

        Ok(track)
    }
}

/// Capture-side handle of a [`ChannelMediaSource`].
#[derive(Clone)]
pub struct MediaFeed {
    current: FeedSlot,
}

impl MediaFeed {
    /// Push one captured frame to the current track.
    ///
    /// Returns `false` when no live track is listening, the track is muted
    /// or its queue is full; capture never blocks.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut current = self.current.lock();
        let Some((tx, enabled)) = current.as_ref() else {
            return false;
        };
        if !enabled.load(Ordering::Acquire) {
            return false;
        }
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *current = None;
                false
            }
        }
    }
}
