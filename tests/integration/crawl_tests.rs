//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GitHub API and run full
//! crawls against an on-disk catalog.

use crate::github_tests::test_settings;
use policy_atlas::config::load_config;
use policy_atlas::crawler::{crawl, CrawlMode, CrawlSettings, Orchestrator};
use policy_atlas::search::{FilenamePattern, GitHubClient};
use policy_atlas::storage::{self, lock_catalog, open_catalog, RunStatus};
use policy_atlas::tasks::{TaskRunner, TaskState};
use policy_atlas::{AtlasError, CatalogStore, ConfigError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repository_body(full_name: &str, stars: u32) -> serde_json::Value {
    let name = full_name.split('/').nth(1).unwrap_or(full_name);
    serde_json::json!({
        "full_name": full_name,
        "name": name,
        "stargazers_count": stars,
        "forks_count": 0,
        "language": null,
        "html_url": format!("https://github.com/{}", full_name),
        "pushed_at": "2024-05-01T12:00:00Z",
        "default_branch": "main"
    })
}

/// One popular repository and one below the star threshold, both with a
/// CLAUDE.md
async fn mock_github() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/code"))
        .and(query_param("q", "filename:CLAUDE.md"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 2,
            "incomplete_results": false,
            "items": [
                { "name": "CLAUDE.md", "path": "CLAUDE.md", "repository": { "full_name": "acme/big" } },
                { "name": "CLAUDE.md", "path": "CLAUDE.md", "repository": { "full_name": "tiny/small" } }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/big"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body("acme/big", 500)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/tiny/small"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body("tiny/small", 3)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/big/contents/CLAUDE.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Guidelines\n\nAlways run cargo fmt.\n"))
        .mount(&server)
        .await;
    // Never fetched: the repository is below the threshold
    Mock::given(method("GET"))
        .and(path("/repos/tiny/small/contents/CLAUDE.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("small"))
        .expect(0)
        .mount(&server)
        .await;

    server
}

fn crawl_settings() -> CrawlSettings {
    CrawlSettings {
        star_threshold: 50,
        max_hits_per_run: 100,
        max_run_duration: Some(Duration::from_secs(60)),
        update_interval: chrono::Duration::hours(24),
        skip_unpushed: true,
        patterns: vec![FilenamePattern::parse("CLAUDE.md").unwrap()],
    }
}

fn orchestrator(server: &MockServer, dir: &TempDir) -> Orchestrator {
    let client = GitHubClient::new(test_settings(server), "test-token").unwrap();
    let catalog = open_catalog(&dir.path().join("atlas.db")).unwrap();
    Orchestrator::new(Arc::new(client), storage::share(catalog), crawl_settings())
}

#[tokio::test]
async fn test_discovery_end_to_end() {
    let server = mock_github().await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&server, &dir);

    let first = orchestrator.run(CrawlMode::Both).await.unwrap();
    assert_eq!(first.searched, 2);
    assert_eq!(first.created, 1);
    assert_eq!(first.filtered, 1);
    assert_eq!(first.errors, 0);

    let second = orchestrator.run(CrawlMode::Both).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 1);

    let store = lock_catalog(orchestrator.catalog()).unwrap();
    assert_eq!(store.count_repositories().unwrap(), 1);
    let repo = store.find_repository("ACME/big").unwrap().unwrap();
    assert_eq!(repo.stars, 500);
    let doc = store.find_document(repo.id, "CLAUDE.md").unwrap().unwrap();
    assert_eq!(doc.file_url, "https://github.com/acme/big/blob/main/CLAUDE.md");
    assert!(doc.needs_scoring);
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let server = mock_github().await;
    let dir = TempDir::new().unwrap();

    orchestrator(&server, &dir).run(CrawlMode::Discover).await.unwrap();

    // A second process sees the same rows and changes nothing
    let stats = orchestrator(&server, &dir)
        .run(CrawlMode::Discover)
        .await
        .unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(stats.skipped, 1);

    let catalog = open_catalog(&dir.path().join("atlas.db")).unwrap();
    assert_eq!(catalog.count_documents().unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_token_fails_tracked_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Bad credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let runner = TaskRunner::new(Arc::new(orchestrator(&server, &dir)), "hash");

    let receipt = runner.trigger(CrawlMode::Discover).unwrap();
    let mut status = runner.status(receipt.task_id).unwrap();
    for _ in 0..200 {
        if matches!(status.state, TaskState::Success | TaskState::Failure) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = runner.status(receipt.task_id).unwrap();
    }

    assert_eq!(status.state, TaskState::Failure);
    assert!(status.error.unwrap().contains("Bad credentials"));
    assert_eq!(status.result.unwrap().processed, 0);
}

#[tokio::test]
async fn test_crawl_from_config_file() {
    let server = mock_github().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("atlas.db");
    let config_path = dir.path().join("atlas.toml");

    let mut file = std::fs::File::create(&config_path).unwrap();
    write!(
        file,
        r#"
[github]
api-url = "{}"
token-env = "POLICY_ATLAS_IT_CONFIG_TOKEN"
retry-backoff-ms = 5

[crawl]
patterns = ["CLAUDE.md"]

[storage]
database-path = "{}"
"#,
        server.uri(),
        db_path.display()
    )
    .unwrap();

    std::env::set_var("POLICY_ATLAS_IT_CONFIG_TOKEN", "test-token");
    let config = load_config(&config_path).unwrap();
    let stats = crawl(&config, CrawlMode::Discover).await.unwrap();
    assert_eq!(stats.created, 1);

    let catalog = open_catalog(&db_path).unwrap();
    assert_eq!(catalog.count_repositories().unwrap(), 1);
}

#[tokio::test]
async fn test_missing_token_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("atlas.toml");
    std::fs::write(
        &config_path,
        format!(
            "[github]\napi-url = \"{}\"\ntoken-env = \"POLICY_ATLAS_IT_UNSET_TOKEN\"\n\n[storage]\ndatabase-path = \"{}\"\n",
            server.uri(),
            dir.path().join("atlas.db").display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let result = Orchestrator::from_config(&config);
    assert!(matches!(
        result,
        Err(AtlasError::Config(ConfigError::MissingCredential(_)))
    ));
    assert!(!dir.path().join("atlas.db").exists());
}

#[tokio::test]
async fn test_run_history_is_persisted() {
    let server = mock_github().await;
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&server, &dir);

    let run_id = orchestrator.queue_run(CrawlMode::Discover, "abc123").unwrap();
    orchestrator
        .run_tracked(run_id, CrawlMode::Discover)
        .await
        .unwrap();

    let catalog = open_catalog(&dir.path().join("atlas.db")).unwrap();
    let run = catalog.get_latest_run().unwrap().unwrap();
    assert_eq!(run.id, run_id);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "abc123");
    assert_eq!(run.stats.created, 1);
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_some());
}
