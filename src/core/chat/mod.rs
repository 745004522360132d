//! Text-generation backend collaborator.
//!
//! The backend is a black-box streaming text service. The bridge sends it
//! the conversation so far and concatenates the streamed fragments into one
//! reply; partial text is never surfaced.

mod client;
pub mod stream;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::core::realtime::base::{BridgeError, BridgeResult};
use crate::core::transcript::{ConversationTurn, Role};

pub use client::HttpTextBackend;
pub use stream::{StreamDecoder, TEXT_FRAGMENT_PREFIX, decode_fragments};

/// Streamed reply fragments, in arrival order.
pub type FragmentStream = BoxStream<'static, BridgeResult<String>>;

/// One message of the request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Request body sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the backend to shape the reply for spoken delivery
    pub voice_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn from_turns(turns: &[ConversationTurn], voice_mode: bool) -> Self {
        Self {
            messages: turns.iter().map(ChatMessage::from).collect(),
            voice_mode,
            user_id: None,
            conversation_id: None,
        }
    }

    pub fn with_context(mut self, user_id: Option<String>, conversation_id: Option<String>) -> Self {
        self.user_id = user_id;
        self.conversation_id = conversation_id;
        self
    }
}

/// Streaming text-generation service.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Start generating a reply. Failure to start (network error, non-2xx)
    /// is a `BridgeError::Backend`.
    async fn generate(&self, request: ChatRequest) -> BridgeResult<FragmentStream>;
}

/// Drain `stream` into one reply.
///
/// Any stream error aborts the reply. An empty reply is a backend error.
pub async fn collect_reply(mut stream: FragmentStream) -> BridgeResult<String> {
    let mut reply = String::new();
    while let Some(fragment) = stream.next().await {
        reply.push_str(&fragment?);
    }
    if reply.trim().is_empty() {
        return Err(BridgeError::Backend("backend produced no output".to_string()));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transcript::{Origin, TranscriptStore};

    #[test]
    fn test_chat_request_wire_format() {
        let store = TranscriptStore::new();
        store.append(Role::Assistant, Origin::Text, "Welcome!");
        store.append(Role::User, Origin::Voice, "What's my budget?");

        let request = ChatRequest::from_turns(&store.snapshot(), true)
            .with_context(Some("u1".into()), None);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["voiceMode"], true);
        assert_eq!(json["userId"], "u1");
        assert!(json.get("conversationId").is_none());
        assert_eq!(json["messages"][0]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "What's my budget?");
    }

    #[tokio::test]
    async fn test_collect_reply() {
        let stream: FragmentStream = futures_util::stream::iter(vec![
            Ok("Your budget".to_string()),
            Ok(" is $5,000.".to_string()),
        ])
        .boxed();
        assert_eq!(collect_reply(stream).await.unwrap(), "Your budget is $5,000.");
    }

    #[tokio::test]
    async fn test_collect_reply_empty_is_error() {
        let stream: FragmentStream = futures_util::stream::iter(Vec::new()).boxed();
        assert!(matches!(
            collect_reply(stream).await,
            Err(BridgeError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_reply_propagates_stream_error() {
        let stream: FragmentStream = futures_util::stream::iter(vec![
            Ok("partial".to_string()),
            Err(BridgeError::Backend("reset".into())),
        ])
        .boxed();
        assert!(collect_reply(stream).await.is_err());
    }
}
