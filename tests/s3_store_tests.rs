//! S3 backend behavior against a mocked S3-compatible endpoint.

use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rule_governance::config::StorageSettings;
use rule_governance::storage::{s3::S3Store, ObjectStore, PutOutcome};

fn settings(endpoint: &str) -> StorageSettings {
    StorageSettings {
        backend: "s3".to_string(),
        root: String::new(),
        endpoint: endpoint.to_string(),
        bucket: "artifacts".to_string(),
        region: "ap-south-1".to_string(),
        access_key: "AKIDEXAMPLE".to_string(),
        secret_key: "test-secret".to_string(),
        path_style: true,
        prefix: None,
    }
}

#[tokio::test]
async fn conditional_put_creates_and_signs() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/artifacts/rulesets/prod/a.json"))
        .and(header("if-none-match", "*"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .and(header_exists("x-amz-content-sha256"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = S3Store::new(&settings(&server.uri())).unwrap();
    let outcome = store
        .put_if_absent("rulesets/prod/a.json", b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, PutOutcome::Created);
}

#[tokio::test]
async fn precondition_failure_reads_as_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/artifacts/a.json"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let store = S3Store::new(&settings(&server.uri())).unwrap();
    let outcome = store.put_if_absent("a.json", b"{}").await.unwrap();
    assert_eq!(outcome, PutOutcome::AlreadyExists);
}

#[tokio::test]
async fn get_maps_404_to_none_and_200_to_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/present.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"a\":1}".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/artifacts/absent.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = S3Store::new(&settings(&server.uri())).unwrap();
    assert_eq!(
        store.get("present.json").await.unwrap().unwrap(),
        b"{\"a\":1}"
    );
    assert!(store.get("absent.json").await.unwrap().is_none());
}

#[tokio::test]
async fn server_errors_classify_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/artifacts/pointer.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = S3Store::new(&settings(&server.uri())).unwrap();
    let err = store.put("pointer.json", b"{}").await.unwrap_err();
    assert_eq!(err.kind(), "UnavailableError");
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_classify_as_publishing_failures() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/artifacts/pointer.json"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let store = S3Store::new(&settings(&server.uri())).unwrap();
    let err = store.put("pointer.json", b"{}").await.unwrap_err();
    assert_eq!(err.kind(), "PublishingError");
    assert!(!err.is_transient());
}
