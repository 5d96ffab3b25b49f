//! Integration tests for the GitHub client
//!
//! These tests run the client against wiremock servers to check retry,
//! rate-limit, and content handling.

use chrono::Utc;
use policy_atlas::search::{
    CodeSearch, FilenamePattern, GitHubClient, GitHubSettings, RateResource, SearchError,
};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn test_settings(server: &MockServer) -> GitHubSettings {
    GitHubSettings {
        api_url: Url::parse(&server.uri()).expect("mock server URI"),
        user_agent: "policy-atlas-tests".to_string(),
        per_page: 2,
        timeout: Duration::from_secs(5),
        max_retries: 3,
        retry_backoff: Duration::from_millis(5),
        min_remaining: 1,
        max_rate_limit_wait: Duration::from_secs(1),
    }
}

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(test_settings(server), "test-token").expect("client")
}

fn repository_body(full_name: &str, stars: u32) -> serde_json::Value {
    let name = full_name.split('/').nth(1).unwrap_or(full_name);
    serde_json::json!({
        "full_name": full_name,
        "name": name,
        "stargazers_count": stars,
        "forks_count": 3,
        "language": "Rust",
        "html_url": format!("https://github.com/{}", full_name),
        "pushed_at": "2024-05-01T12:00:00Z",
        "default_branch": "trunk"
    })
}

#[tokio::test]
async fn test_repository_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body("acme/widgets", 321)))
        .expect(1)
        .mount(&server)
        .await;

    let repo = client(&server).repository("acme/widgets").await.unwrap();
    assert_eq!(repo.stars, 321);
    assert_eq!(repo.forks, 3);
    assert_eq!(repo.default_branch, "trunk");
    assert_eq!(
        repo.file_url("docs/CLAUDE.md"),
        "https://github.com/acme/widgets/blob/trunk/docs/CLAUDE.md"
    );
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Bad credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).repository("acme/widgets").await.unwrap_err();
    assert!(err.is_fatal());
    match err {
        SearchError::Auth { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Bad credentials");
        }
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_repository_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/gone/away"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).repository("gone/away").await.unwrap_err();
    assert!(matches!(err, SearchError::NotFound { .. }));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body("acme/widgets", 60)))
        .expect(1)
        .mount(&server)
        .await;

    let repo = client(&server).repository("acme/widgets").await.unwrap();
    assert_eq!(repo.stars, 60);
}

#[tokio::test]
async fn test_persistent_server_errors_become_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).repository("acme/widgets").await.unwrap_err();
    assert!(matches!(err, SearchError::Transient { attempts: 3, .. }));
}

#[tokio::test]
async fn test_exhausted_quota_reports_rate_limit() {
    let server = MockServer::start().await;
    let reset = (Utc::now() + chrono::Duration::hours(1)).timestamp();
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/CLAUDE.md"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .insert_header("x-ratelimit-resource", "core")
                .set_body_json(serde_json::json!({"message": "API rate limit exceeded"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .fetch_content("acme/widgets", "CLAUDE.md")
        .await
        .unwrap_err();
    match err {
        SearchError::RateLimited { resource, reset_at } => {
            assert_eq!(resource, RateResource::Core);
            assert_eq!(reset_at.map(|t| t.timestamp()), Some(reset));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(client.budget().snapshot(RateResource::Core).remaining, Some(0));
}

#[tokio::test]
async fn test_retry_after_is_waited_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_json(serde_json::json!({"message": "You have exceeded a secondary rate limit"})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body("acme/widgets", 42)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let started = std::time::Instant::now();
    let repo = client.repository("acme/widgets").await.unwrap();
    assert_eq!(repo.stars, 42);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(client.budget().snapshot(RateResource::Core).requests_made, 2);
}

#[tokio::test]
async fn test_unreadable_body_is_retried() {
    let server = MockServer::start().await;
    // Claims gzip but is not, so the body fails while being read
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/CLAUDE.md"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(b"definitely not gzip".to_vec()),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/CLAUDE.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Rules\n"))
        .expect(1)
        .mount(&server)
        .await;

    let content = client(&server)
        .fetch_content("acme/widgets", "CLAUDE.md")
        .await
        .unwrap();
    assert_eq!(content, "# Rules\n");
}

#[tokio::test]
async fn test_persistently_unreadable_body_becomes_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/CLAUDE.md"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(b"still not gzip".to_vec()),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_content("acme/widgets", "CLAUDE.md")
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Transient { attempts: 3, .. }));
}

#[tokio::test]
async fn test_forbidden_without_rate_limit_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/private"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({"message": "Resource not accessible"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).repository("acme/private").await.unwrap_err();
    assert!(matches!(err, SearchError::Api { status: 403, .. }));
}

#[tokio::test]
async fn test_raw_content_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/.github/CLAUDE.md"))
        .and(header("accept", "application/vnd.github.raw+json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Rules\n\nRun the tests.\n"))
        .expect(1)
        .mount(&server)
        .await;

    let content = client(&server)
        .fetch_content("acme/widgets", ".github/CLAUDE.md")
        .await
        .unwrap();
    assert_eq!(content, "# Rules\n\nRun the tests.\n");
}

#[tokio::test]
async fn test_binary_content_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contents/.cursorrules"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00, 0x81]))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_content("acme/widgets", ".cursorrules")
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::ContentDecode { .. }));
}

fn search_item(full_name: &str, path: &str) -> serde_json::Value {
    let name = path.rsplit('/').next().unwrap_or(path);
    serde_json::json!({
        "name": name,
        "path": path,
        "repository": { "full_name": full_name }
    })
}

#[tokio::test]
async fn test_search_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .and(query_param("q", "filename:CLAUDE.md"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 3,
            "incomplete_results": false,
            "items": [search_item("a/one", "CLAUDE.md"), search_item("b/two", "docs/CLAUDE.md")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .and(query_param("q", "filename:CLAUDE.md"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 3,
            "incomplete_results": false,
            "items": [search_item("c/three", "CLAUDE.md")]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let pattern = FilenamePattern::parse("CLAUDE.md").unwrap();

    let first = client.search_page(&pattern, 1).await.unwrap();
    assert_eq!(first.hits.len(), 2);
    assert_eq!(first.total_count, 3);
    assert!(first.has_more);
    assert_eq!(first.hits[1].path, "docs/CLAUDE.md");
    assert_eq!(first.hits[1].filename, "CLAUDE.md");

    let second = client.search_page(&pattern, 2).await.unwrap();
    assert_eq!(second.hits.len(), 1);
    assert!(!second.has_more);
}

#[tokio::test]
async fn test_suffix_pattern_queries_suffix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .and(query_param("q", "filename:.cursorrules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 0,
            "items": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pattern = FilenamePattern::parse("*.cursorrules").unwrap();
    let page = client(&server).search_page(&pattern, 1).await.unwrap();
    assert!(page.hits.is_empty());
    assert!(!page.has_more);
}
