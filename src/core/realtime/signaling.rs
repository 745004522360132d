//! SDP offer/answer exchange with the hosted realtime endpoint.

use std::time::Duration;

use tracing::{debug, error};

use super::base::{BridgeError, BridgeResult};
use super::credentials::EphemeralToken;

/// Posts local offers to the signaling endpoint and returns remote answers.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    url: String,
    model: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SignalingClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: None,
            timeout: Duration::from_secs(15),
            client: reqwest::Client::new(),
        }
    }

    /// Send `?model=<model>` with every exchange.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = (!model.trim().is_empty()).then_some(model);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Exchange `offer_sdp` for the remote answer.
    ///
    /// Any non-2xx status, transport failure or an answer that is not an
    /// SDP document is a `BridgeError::Signaling`.
    pub async fn exchange(&self, offer_sdp: &str, token: &EphemeralToken) -> BridgeResult<String> {
        debug!(url = %self.url, model = ?self.model, "Sending SDP offer");

        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string());

        if let Some(model) = &self.model {
            request = request.query(&[("model", model)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Signaling(format!("offer request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Realtime signaling rejected: {}", error_text);
            return Err(BridgeError::Signaling(format!(
                "Failed to establish connection: HTTP {status} - {error_text}"
            )));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to read answer: {e}")))?;

        if !answer.trim_start().starts_with("v=") {
            return Err(BridgeError::Signaling(
                "answer is not a session description".to_string(),
            ));
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ANSWER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n";

    #[tokio::test]
    async fn test_exchange_sends_offer_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .and(query_param("model", "gpt-4o-realtime-preview-2024-12-17"))
            .and(header("authorization", "Bearer ek_abc"))
            .and(header("content-type", "application/sdp"))
            .and(body_string("v=0\r\noffer\r\n"))
            .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
            .expect(1)
            .mount(&server)
            .await;

        let client = SignalingClient::new(format!("{}/v1/realtime", server.uri()))
            .with_model("gpt-4o-realtime-preview-2024-12-17");
        let token = EphemeralToken::new("ek_abc", None);
        let answer = client.exchange("v=0\r\noffer\r\n", &token).await.unwrap();
        assert_eq!(answer, ANSWER);
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad offer"))
            .mount(&server)
            .await;

        let client = SignalingClient::new(server.uri());
        let err = client
            .exchange("v=0", &EphemeralToken::new("t", None))
            .await
            .unwrap_err();
        match err {
            BridgeError::Signaling(message) => {
                assert!(message.contains("400"));
                assert!(message.contains("bad offer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_malformed_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = SignalingClient::new(server.uri());
        assert!(matches!(
            client.exchange("v=0", &EphemeralToken::new("t", None)).await,
            Err(BridgeError::Signaling(_))
        ));
    }

    #[test]
    fn test_blank_model_is_not_sent() {
        let client = SignalingClient::new("https://example.com").with_model("  ");
        assert!(client.model.is_none());
    }
}
