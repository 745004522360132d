//! Base types for the realtime voice bridge.
//!
//! This module defines the error taxonomy, the session connection state
//! machine and the callback types shared by every realtime component.
//!
//! # Error propagation
//!
//! | Kind                       | Scope     | Effect on session        |
//! |----------------------------|-----------|--------------------------|
//! | `credential_error`         | terminal  | `failed`                 |
//! | `media_error`              | terminal  | `failed`                 |
//! | `signaling_error`          | terminal  | `failed`                 |
//! | `transport_error`          | terminal  | `failed`                 |
//! | `protocol_error`           | turn      | none                     |
//! | `backend_error`            | turn      | none                     |
//! | `synthesis_dispatch_error` | reply     | none (reply unspoken)    |

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::transcript::ConversationTurn;

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by the voice bridge and its collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The short-lived realtime credential could not be obtained
    #[error("Credential error: {0}")]
    Credential(String),

    /// Microphone permission denied or device unavailable
    #[error("Media error: {0}")]
    Media(String),

    /// Offer/answer exchange rejected or answer malformed
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Transport failed after (or while) connecting
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or error-flagged inbound control message
    #[error("Protocol error{}: {message}", code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Protocol {
        /// Provider error code, when the provider sent one
        code: Option<String>,
        /// Human readable message
        message: String,
    },

    /// Text-generation call failed or produced no output
    #[error("Backend error: {0}")]
    Backend(String),

    /// Speech was requested while the control channel was not open
    #[error("Synthesis dispatch error: {0}")]
    SynthesisDispatch(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Stable, wire-friendly name of an error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialError,
    MediaError,
    SignalingError,
    TransportError,
    ProtocolError,
    BackendError,
    SynthesisDispatchError,
}

impl ErrorKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialError => "credential_error",
            Self::MediaError => "media_error",
            Self::SignalingError => "signaling_error",
            Self::TransportError => "transport_error",
            Self::ProtocolError => "protocol_error",
            Self::BackendError => "backend_error",
            Self::SynthesisDispatchError => "synthesis_dispatch_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BridgeError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Credential(_) => ErrorKind::CredentialError,
            Self::Media(_) => ErrorKind::MediaError,
            Self::Signaling(_) => ErrorKind::SignalingError,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::Protocol { .. } => ErrorKind::ProtocolError,
            Self::Backend(_) => ErrorKind::BackendError,
            Self::SynthesisDispatch(_) => ErrorKind::SynthesisDispatchError,
        }
    }

    /// Whether this error ends the current session.
    ///
    /// Terminal errors force the session into `failed` and the caller must
    /// call `connect()` again. Everything else is local to one turn or one
    /// reply and the session keeps accepting utterances.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Credential(_) | Self::Media(_) | Self::Signaling(_) | Self::Transport(_)
        )
    }

    pub(crate) fn protocol(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the realtime session.
///
/// ```text
/// idle ──connect──▶ connecting ──channel open──▶ connected
///                      │                            │
///                      └────────error──▶ failed ◀───┘
/// any ──disconnect / transport closed──▶ closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection attempt has been made yet
    #[default]
    Idle,
    /// Credential, media and signaling steps are in progress
    Connecting,
    /// Control channel is open; outbound control messages may be sent
    Connected,
    /// The last attempt or session failed; call `connect()` to retry
    Failed,
    /// Disconnected explicitly or by the transport
    Closed,
}

impl ConnectionState {
    /// Whether the state owns live session resources.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Identity of one connection attempt.
///
/// Every `connect()` allocates a fresh, strictly increasing id. Async work
/// compares its captured id against the current one before touching shared
/// state, so a disconnect followed by an immediate reconnect never lets a
/// stale continuation land on the new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Text the hosted model reports as actually spoken for a synthesized reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedSpeech {
    /// Provider response id
    pub response_id: Option<String>,
    /// Spoken transcript (may differ slightly from the requested text)
    pub transcript: String,
}

/// Callback type for connection state changes.
pub type StateChangeCallback =
    Arc<dyn Fn(ConnectionState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for appended conversation turns.
pub type TurnCallback =
    Arc<dyn Fn(ConversationTurn) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for error events.
pub type BridgeErrorCallback =
    Arc<dyn Fn(BridgeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for synthesized speech transcripts.
pub type SpeechSynthesizedCallback =
    Arc<dyn Fn(SynthesizedSpeech) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
