use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{ChatRequest, FragmentStream, TextBackend, decode_fragments};
use crate::core::realtime::base::{BridgeError, BridgeResult};

/// Text backend reached over HTTP.
///
/// POSTs the request as JSON and decodes the line-delimited response body
/// incrementally.
pub struct HttpTextBackend {
    url: String,
    connect_timeout: Duration,
    client: reqwest::Client,
}

impl HttpTextBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    /// Bound on receiving response headers; the body itself may stream for
    /// longer.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl TextBackend for HttpTextBackend {
    async fn generate(&self, request: ChatRequest) -> BridgeResult<FragmentStream> {
        debug!(
            url = %self.url,
            messages = request.messages.len(),
            voice_mode = request.voice_mode,
            "Chat request"
        );

        let send = self.client.post(&self.url).json(&request).send();
        let response = tokio::time::timeout(self.connect_timeout, send)
            .await
            .map_err(|_| BridgeError::Backend("chat request timed out".to_string()))?
            .map_err(|e| BridgeError::Backend(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Chat backend returned error: {}", error_text);
            return Err(BridgeError::Backend(format!(
                "Failed to get response from chat API: HTTP {status}"
            )));
        }

        Ok(decode_fragments(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat::collect_reply;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_streams_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"voiceMode": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("0:\"Your budget\"\n0:\" is $5,000.\"\ne:{}\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpTextBackend::new(format!("{}/api/chat", server.uri()));
        let request = ChatRequest {
            messages: vec![],
            voice_mode: true,
            user_id: None,
            conversation_id: None,
        };
        let stream = backend.generate(request).await.unwrap();
        assert_eq!(collect_reply(stream).await.unwrap(), "Your budget is $5,000.");
    }

    #[tokio::test]
    async fn test_generate_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = HttpTextBackend::new(server.uri());
        let request = ChatRequest::from_turns(&[], false);
        assert!(matches!(
            backend.generate(request).await,
            Err(BridgeError::Backend(_))
        ));
    }
}
