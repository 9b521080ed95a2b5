//! Integration tests for the registry HTTP client against a mock registry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use regstat_registry::{
    BackoffPolicy, BlobDigest, HttpRegistryClient, HttpRegistryConfig, MetadataSource, Pager,
    RegistryError, RetryPolicy,
};

fn client_for(server: &MockServer) -> Arc<HttpRegistryClient> {
    let config = HttpRegistryConfig {
        registry_url: server.uri(),
        auth_token: Some("secret-token".to_string()),
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    Arc::new(HttpRegistryClient::new(config).unwrap())
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter: 0.0,
        },
    }
}

#[tokio::test]
async fn test_catalog_follows_link_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .and(query_param("n", "2"))
        .and(header("Authorization", "Bearer secret-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"repositories": ["app", "base"]}))
                .insert_header("Link", r#"</v2/_catalog?last=base&n=3>; rel="next""#),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .and(query_param("n", "3"))
        .and(query_param("last", "base"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"repositories": ["tools"]})))
        .mount(&server)
        .await;

    let images = Pager::catalog(client_for(&server), 2)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(images, vec!["app", "base", "tools"]);
}

#[tokio::test]
async fn test_unknown_repository_tags_are_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/ghost/tags/list"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errors": [{"code": "NAME_UNKNOWN", "message": "repository name not known to registry"}]
        })))
        .mount(&server)
        .await;

    let tags = Pager::tags(client_for(&server), "ghost", 100)
        .collect_all()
        .await
        .unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn test_null_tag_list_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/app/tags/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "app", "tags": null})))
        .mount(&server)
        .await;

    let tags = Pager::tags(client_for(&server), "app", 100)
        .collect_all()
        .await
        .unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn test_transient_catalog_failure_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"repositories": ["app"]})))
        .mount(&server)
        .await;

    let images = Pager::catalog(client_for(&server), 100)
        .with_retry(fast_retry())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(images, vec!["app"]);
}

#[tokio::test]
async fn test_schema1_manifest_is_base_first() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/team/app/manifests/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaVersion": 1,
            "name": "team/app",
            "tag": "v2",
            "fsLayers": [{"blobSum": "sha256:layerx"}, {"blobSum": "sha256:base"}]
        })))
        .mount(&server)
        .await;

    let manifest = client_for(&server)
        .get_manifest("team/app", "v2")
        .await
        .unwrap();
    assert_eq!(
        manifest.digests(),
        vec![BlobDigest::new("sha256:base"), BlobDigest::new("sha256:layerx")]
    );
}

#[tokio::test]
async fn test_empty_manifest_body_is_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_manifest("app", "v1")
        .await
        .unwrap_err();
    assert!(err.is_invalid_manifest());
}

#[tokio::test]
async fn test_missing_manifest_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_manifest("app", "gone")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/v2/app/blobs/sha256:missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_blob_info("app", &BlobDigest::new("sha256:missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_denied_is_reported_as_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errors": [{"code": "UNAUTHORIZED", "message": "authentication required"}]
        })))
        .mount(&server)
        .await;

    let err = Pager::catalog(client_for(&server), 100)
        .collect_all()
        .await
        .unwrap_err();
    match err {
        RegistryError::Api { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("unexpected error: {other}"),
    }
}
