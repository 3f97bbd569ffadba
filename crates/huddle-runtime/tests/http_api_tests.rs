//! HTTP durable API tests against a local mock server

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huddle_core::{
    ApiConfig, ApiError, ClientMessageId, FailureClass, MessageDraft, MessageKind, Page, RoomId,
    ServerMessageId, UserId,
};
use huddle_runtime::{DurableApi, HttpDurableApi};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn api_for(server: &MockServer) -> HttpDurableApi {
    let config = ApiConfig {
        base_url: format!("{}/api", server.uri()),
        ..ApiConfig::default()
    };
    HttpDurableApi::new(&config, "token").unwrap()
}

fn draft() -> MessageDraft {
    MessageDraft {
        client_id: ClientMessageId::generate(),
        room: RoomId::from("r1"),
        sender: UserId::from("alice"),
        body: "hi".to_string(),
        kind: MessageKind::Text,
        group: None,
    }
}

async fn failing_write(status: u16, body: serde_json::Value) -> ApiError {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/r1/messages"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    api_for(&server).create_message(&draft()).await.unwrap_err()
}

// ----------------------------------------------------------------------------
// Success Paths
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_create_message_sends_bearer_and_draft() {
    let server = MockServer::start().await;
    let draft = draft();
    Mock::given(method("POST"))
        .and(path("/api/rooms/r1/messages"))
        .and(header("authorization", "Bearer token"))
        .and(body_partial_json(json!({
            "client_id": draft.client_id,
            "body": "hi",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "srv-9",
            "room": "r1",
            "sender": "alice",
            "body": "hi",
            "created_at": 1700000000000u64,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = api_for(&server).create_message(&draft).await.unwrap();

    assert_eq!(record.id, ServerMessageId::from("srv-9"));
    assert_eq!(record.kind, MessageKind::Text);
}

#[tokio::test]
async fn test_list_messages_passes_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rooms/r1/messages"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let page = Page { index: 2, size: 25 };
    let records = api_for(&server)
        .list_messages(&RoomId::from("r1"), page)
        .await
        .unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_create_private_room_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/private"))
        .and(body_partial_json(json!({ "user_a": "alice", "user_b": "bob" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "dm-1" })))
        .mount(&server)
        .await;

    let room = api_for(&server)
        .create_private_room(&UserId::from("alice"), &UserId::from("bob"))
        .await
        .unwrap();

    assert_eq!(room, RoomId::from("dm-1"));
}

// ----------------------------------------------------------------------------
// Failure Classification
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_conflict_status_is_write_conflict() {
    let error = failing_write(409, json!({ "message": "duplicate" })).await;
    assert_eq!(error.class(), FailureClass::WriteConflict);
}

#[tokio::test]
async fn test_duplicate_key_code_is_write_conflict() {
    let error = failing_write(500, json!({ "code": "duplicate_key", "message": "E11000" })).await;
    assert_eq!(error, ApiError::conflict("E11000"));
}

#[tokio::test]
async fn test_unavailable_is_server_error() {
    let error = failing_write(503, json!({ "error": "maintenance" })).await;
    assert_eq!(error, ApiError::server(503, "maintenance"));
}

#[tokio::test]
async fn test_validation_failure_is_rejected() {
    let error = failing_write(422, json!({ "error": "body too long" })).await;
    assert_eq!(error.class(), FailureClass::Rejected);
}

#[tokio::test]
async fn test_undecodable_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/r1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let error = api_for(&server).create_message(&draft()).await.unwrap_err();

    assert!(matches!(error, ApiError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let server = MockServer::start().await;
    let api = api_for(&server);
    drop(server);

    let error = api.create_message(&draft()).await.unwrap_err();

    assert_eq!(error.class(), FailureClass::TransientNetwork);
}
