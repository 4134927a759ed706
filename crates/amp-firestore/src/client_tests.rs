//! Tests for Firestore client functionality.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::retry::no_retry;
use crate::types::{Filter, Value};

// =============================================================================
// Test Helpers
// =============================================================================

fn test_config() -> FirestoreConfig {
    FirestoreConfig {
        project_id: "test-project".to_string(),
        database_id: "(default)".to_string(),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: no_retry(),
        emulator_host: None,
    }
}

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

async fn client_for(server: &MockServer) -> FirestoreClient {
    FirestoreClient::with_base_url(test_config(), server.uri()).unwrap()
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
#[serial]
fn test_config_from_env_validates_project_id() {
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::remove_var("FIREBASE_PROJECT_ID");
    assert!(FirestoreConfig::from_env().is_err());
}

#[test]
#[serial]
fn test_config_default_values() {
    std::env::set_var("GCP_PROJECT_ID", "test-project");
    std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
    std::env::remove_var("FIRESTORE_EMULATOR_HOST");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.database_id, "(default)");
    assert!(config.emulator_host.is_none());
    std::env::remove_var("GCP_PROJECT_ID");
}

#[test]
#[serial]
fn test_config_reads_emulator_host() {
    std::env::set_var("GCP_PROJECT_ID", "test-project");
    std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
    std::env::remove_var("FIRESTORE_EMULATOR_HOST");
    std::env::remove_var("GCP_PROJECT_ID");
}

// =============================================================================
// Error Type Tests
// =============================================================================

#[test]
fn test_error_from_http_status() {
    use FirestoreError::*;

    let status = |code| FirestoreError::from_http_status(code, "body");
    assert!(matches!(status(429), RateLimited(_)));
    assert!(matches!(status(503), ServerError(503, _)));
    assert!(matches!(status(404), NotFound(_)));
    assert!(matches!(status(409), AlreadyExists(_)));
    assert!(matches!(status(400), RequestFailed(_)));
}

#[test]
fn test_failed_precondition_body_wins_over_status() {
    let body = r#"{"error":{"status":"FAILED_PRECONDITION"}}"#;
    let err = FirestoreError::from_http_status(400, body);
    assert!(err.is_conflict());
    assert!(!err.is_retryable());
}

#[test]
fn test_retryability() {
    assert!(FirestoreError::RateLimited(10).is_retryable());
    assert!(FirestoreError::ServerError(502, "bad gateway".into()).is_retryable());
    assert!(!FirestoreError::NotFound("x".into()).is_retryable());
    assert_eq!(FirestoreError::RateLimited(250).retry_after_ms(), Some(250));
}

// =============================================================================
// HTTP Contract Tests
// =============================================================================

#[tokio::test]
async fn test_get_document_found_and_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/users/u1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test-project/databases/(default)/documents/users/u1",
            "fields": {"credits": {"integerValue": "4"}},
            "updateTime": "2025-01-01T00:00:00.000001Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/users/ghost", DOCS)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let doc = client.get_document("users", "u1").await.unwrap().unwrap();
    assert_eq!(doc.id(), Some("u1"));
    assert_eq!(doc.update_time.as_deref(), Some("2025-01-01T00:00:00.000001Z"));
    assert!(client.get_document("users", "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_document_posts_with_document_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/users", DOCS)))
        .and(query_param("documentId", "u1"))
        .and(body_partial_json(json!({"fields": {"credits": {"integerValue": "10"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test-project/databases/(default)/documents/users/u1",
            "fields": {"credits": {"integerValue": "10"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut fields = HashMap::new();
    fields.insert("credits".to_string(), Value::IntegerValue("10".into()));
    let doc = client.create_document("users", "u1", fields).await.unwrap();
    assert_eq!(doc.id(), Some("u1"));
}

#[tokio::test]
async fn test_create_existing_document_is_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/users", DOCS)))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"code": 409, "status": "ALREADY_EXISTS"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .create_document("users", "u1", HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FirestoreError::AlreadyExists(ref name) if name == "users/u1"));
}

#[tokio::test]
async fn test_update_document_sends_field_mask() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{}/users/u1", DOCS)))
        .and(query_param("updateMask.fieldPaths", "last_active_at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test-project/databases/(default)/documents/users/u1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut fields = HashMap::new();
    fields.insert(
        "last_active_at".to_string(),
        Value::TimestampValue("2025-01-01T00:00:00Z".into()),
    );
    client
        .update_document("users", "u1", fields, Some(vec!["last_active_at".into()]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_without_mask_replaces_whole_document() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{}/pending_charges/p1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test-project/databases/(default)/documents/pending_charges/p1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .update_document("pending_charges", "p1", HashMap::new(), None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), None);
}

#[tokio::test]
async fn test_commit_posts_writes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCS)))
        .and(body_partial_json(json!({
            "writes": [{"currentDocument": {"exists": false}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "writeResults": [{"updateTime": "2025-01-01T00:00:00Z"}],
            "commitTime": "2025-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let name = client.full_document_name("images", "i1");
    let result = client
        .commit(vec![Write::insert(Document::named(name, HashMap::new()))])
        .await
        .unwrap();
    assert_eq!(result.commit_time.as_deref(), Some("2025-01-01T00:00:00Z"));
}

#[tokio::test]
async fn test_commit_precondition_failure_is_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCS)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "status": "FAILED_PRECONDITION", "message": "stale"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .commit(vec![Write::insert(Document::default())])
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_run_query_skips_read_time_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"document": {"name": "x/images/a", "fields": {}}, "readTime": "t"},
            {"readTime": "t"}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let docs = client
        .run_query(
            StructuredQuery::collection("images")
                .filter(Filter::equal("user_id", Value::StringValue("u1".into())))
                .limit(10),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), Some("a"));
}

#[tokio::test]
async fn test_delete_of_missing_document_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/pending_charges/p1", DOCS)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client.delete_document("pending_charges", "p1").await.unwrap();
}

#[test]
fn test_full_document_name_has_no_version_prefix() {
    let client = FirestoreClient::with_base_url(test_config(), "http://localhost:8080").unwrap();
    assert_eq!(
        client.full_document_name("users", "u1"),
        "projects/test-project/databases/(default)/documents/users/u1"
    );
}

#[tokio::test]
async fn test_unauthorized_without_token_cache_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string("{\"status\":\"UNAUTHENTICATED\"}"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.get_document("users", "u1").await.unwrap_err();
    assert!(matches!(err, FirestoreError::AuthError(_)));
}
