//! Transcript Store.
//!
//! An ordered, append-only log of conversation turns shared by the voice
//! flow and keyboard chat. Turns are ordered by the moment they are
//! appended (completion order) and are never mutated afterwards.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Modality that produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Voice,
    Text,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Voice => write!(f, "voice"),
            Origin::Text => write!(f, "text"),
        }
    }
}

/// One utterance or generated reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Monotonic ordering key, starting at 1
    pub sequence: u64,
    pub role: Role,
    pub origin: Origin,
    pub content: String,
    /// Wall-clock append time in unix milliseconds (informational only)
    pub recorded_at_ms: u64,
}

#[derive(Default)]
struct Log {
    turns: Vec<ConversationTurn>,
    next_sequence: u64,
}

/// Append-only conversation log, safe to share between tasks.
#[derive(Default)]
pub struct TranscriptStore {
    log: RwLock<Log>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return it with its assigned sequence number.
    pub fn append(&self, role: Role, origin: Origin, content: impl Into<String>) -> ConversationTurn {
        let recorded_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut log = self.log.write();
        log.next_sequence += 1;
        let turn = ConversationTurn {
            sequence: log.next_sequence,
            role,
            origin,
            content: content.into(),
            recorded_at_ms,
        };
        log.turns.push(turn.clone());
        turn
    }

    /// Copy of every turn, in order.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.log.read().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.log.read().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().turns.is_empty()
    }

    /// History to answer user turn `sequence` with.
    ///
    /// Every turn appended so far except user turns newer than `sequence`
    /// (still waiting for their own reply), with turn `sequence` last.
    pub fn reply_context(&self, sequence: u64) -> Vec<ConversationTurn> {
        let log = self.log.read();
        let mut context: Vec<ConversationTurn> = log
            .turns
            .iter()
            .filter(|t| t.sequence != sequence)
            .filter(|t| !(t.role == Role::User && t.sequence > sequence))
            .cloned()
            .collect();
        if let Some(turn) = log.turns.iter().find(|t| t.sequence == sequence) {
            context.push(turn.clone());
        }
        context
    }

    /// The final turn, if it is an assistant turn.
    pub fn trailing_assistant_turn(&self) -> Option<ConversationTurn> {
        self.log
            .read()
            .turns
            .last()
            .filter(|t| t.role == Role::Assistant)
            .cloned()
    }
}
