//! HTTP Collaborator Integration Tests
//!
//! Runs the bridge with its default HTTP credential provider, signaling
//! client and chat backend against wiremock. Only the WebRTC transport is
//! replaced by the in-memory fake.

mod fixtures;

use std::sync::Arc;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fixtures::*;
use voice_bridge::realtime::ErrorKind;
use voice_bridge::{BridgeConfig, ChannelMediaSource, ConnectionState, Role, VoiceBridgeBuilder};

async fn mount_token(server: &MockServer, status: u16, body: Value) {
    Mock::given(method("GET"))
        .and(path("/api/realtime/token"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

fn app_config(app: &MockServer, signaling: &MockServer) -> BridgeConfig {
    BridgeConfig {
        credential_url: format!("{}/api/realtime/token", app.uri()),
        chat_url: format!("{}/api/chat", app.uri()),
        user_id: Some("user-7".to_string()),
        conversation_id: Some("conv-3".to_string()),
        ..test_config(signaling)
    }
}

#[tokio::test]
async fn test_voice_turn_over_http() {
    let app = MockServer::start().await;
    let signaling = MockServer::start().await;

    mount_token(&app, 200, json!({ "token": "ek_live_123", "expiresAt": 1735000000 })).await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(header("authorization", "Bearer ek_live_123"))
        .and(query_param("model", "gpt-4o-realtime-preview-2024-12-17"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .expect(1)
        .mount(&signaling)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "voiceMode": true,
            "userId": "user-7",
            "conversationId": "conv-3",
            "messages": [{ "role": "user", "content": "What's my budget?" }]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("0:\"Your budget \"\n0:\"is $5,000.\"\n"),
        )
        .expect(1)
        .mount(&app)
        .await;

    let transports = FakeTransportFactory::new();
    let bridge = VoiceBridgeBuilder::new(app_config(&app, &signaling))
        .media(Arc::new(ChannelMediaSource::new()))
        .transport_factory(transports.clone())
        .build()
        .unwrap();

    bridge.connect().await.unwrap();
    let transport = transports.last();
    transport.open_channel();
    assert!(wait_until(|| bridge.state() == ConnectionState::Connected).await);

    transport.inject(transcription("item_1", "What's my budget?"));

    let transcript = bridge.transcript();
    assert!(wait_until(|| transcript.len() == 2).await);
    let reply = transcript.trailing_assistant_turn().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Your budget is $5,000.");

    let channel = transport.channel();
    assert!(wait_until(|| channel.sent_conversation().len() == 2).await);

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_token_route_rejection() {
    let app = MockServer::start().await;
    let signaling = signaling_server().await;
    mount_token(&app, 401, json!({ "error": "unauthorized" })).await;

    let media = Arc::new(ChannelMediaSource::new());
    let transports = FakeTransportFactory::new();
    let bridge = VoiceBridgeBuilder::new(app_config(&app, &signaling))
        .media(media.clone())
        .transport_factory(transports.clone())
        .build()
        .unwrap();

    let err = bridge.connect().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CredentialError);
    assert!(err.to_string().contains("Failed to get Realtime token"));
    assert_eq!(bridge.state(), ConnectionState::Failed);
    assert_eq!(media.acquisitions(), 0);
    assert_eq!(transports.created(), 0);
}

#[tokio::test]
async fn test_chat_failure_surfaces_backend_error() {
    let app = MockServer::start().await;
    let signaling = signaling_server().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app)
        .await;

    let bridge = VoiceBridgeBuilder::new(app_config(&app, &signaling))
        .media(Arc::new(ChannelMediaSource::new()))
        .build()
        .unwrap();

    let err = bridge.submit_text_turn("hello?").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendError);
    assert!(err.to_string().contains("Failed to get response from chat API"));
    let turns = bridge.transcript().snapshot();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
}

#[tokio::test]
async fn test_text_turn_over_http() {
    let app = MockServer::start().await;
    let signaling = signaling_server().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "voiceMode": false })))
        .respond_with(ResponseTemplate::new(200).set_body_string("0:\"Typed \"\n0:\"reply\"\n"))
        .mount(&app)
        .await;

    let bridge = VoiceBridgeBuilder::new(app_config(&app, &signaling))
        .media(Arc::new(ChannelMediaSource::new()))
        .build()
        .unwrap();

    let reply = bridge.submit_text_turn("hi").await.unwrap();
    assert_eq!(reply.content, "Typed reply");
    assert_eq!(bridge.transcript().len(), 2);
}
