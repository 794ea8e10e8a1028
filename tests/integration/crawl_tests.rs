//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run whole
//! tasks through the lifecycle manager, from creation to the persisted
//! terminal record.

use escalade::config::Config;
use escalade::fetch::{build_http_client, ApiFetchProvider, DirectFetchProvider, FetchProvider, Tier};
use escalade::state::{CrawlLimits, ErrorKind};
use escalade::storage::{
    FsBlobStore, MemoryBlobStore, MemoryTaskStore, NullDocumentSink, SqliteTaskStore, TaskStore,
};
use escalade::{TaskManager, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Configuration with fast timings for local mock servers
fn test_config() -> Config {
    let mut config = Config::default();
    config.crawl.request_delay_ms = 0;
    config.crawl.total_timeout_secs = 30;
    config.crawl.page_timeout_secs = 5;
    config.crawl.max_workers = 4;
    config.provider.retries = 0;
    config.provider.retry_delay_ms = 1;
    config.sufficiency.min_text_len = Some(100);
    config
}

fn direct_provider() -> Arc<dyn FetchProvider> {
    let client = build_http_client("escalade-tests/0.1").expect("Failed to build client");
    Arc::new(DirectFetchProvider::new(client))
}

fn memory_manager(config: Config, provider: Arc<dyn FetchProvider>) -> (TaskManager, Arc<MemoryBlobStore>) {
    let blobs = Arc::new(MemoryBlobStore::new());
    let manager = TaskManager::new(
        config,
        provider,
        Arc::new(MemoryTaskStore::new()),
        blobs.clone(),
        Arc::new(NullDocumentSink),
    );
    (manager, blobs)
}

/// An HTML page with enough visible text and the given links
fn page(title: &str, links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{}\">{}</a>\n", l, l))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body><p>{}</p>{}</body></html>",
        title,
        "Plenty of readable text on this page. ".repeat(8),
        anchors
    )
}

fn html_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

fn pdf_response(size: usize) -> ResponseTemplate {
    let mut body = b"%PDF-1.5\n".to_vec();
    body.resize(size, b'0');
    ResponseTemplate::new(200).set_body_raw(body, "application/pdf")
}

fn limits(config: &Config, max_pages: u32, max_documents: u32, max_depth: u32) -> CrawlLimits {
    let mut limits = config.default_limits();
    limits.max_pages = max_pages;
    limits.max_documents = max_documents;
    limits.max_depth = max_depth;
    limits
}

async fn mount_small_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(page(
            "Home",
            &[
                format!("{}/page1", base),
                "/page2".to_string(),
                "/files/report.pdf".to_string(),
            ],
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html_response(page("Page 1", &["/".to_string(), "/page2".to_string()])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html_response(page("Page 2", &["/page1".to_string()])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(pdf_response(4096))
        .mount(server)
        .await;
}

async fn requests_matching(server: &MockServer, prefix: &str) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn test_full_crawl_small_site() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let config = test_config();
    let limits = limits(&config, 3, 1, 3);
    let policy = config.default_policy();
    let (manager, blobs) = memory_manager(config, direct_provider());

    let seed = format!("{}/", server.uri());
    let task = manager.create_with("user-1", &seed, limits, policy).await.unwrap();
    assert_eq!(manager.start(task.id).await.unwrap(), TaskStatus::Running);

    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.pages_visited, 3);
    assert_eq!(snapshot.task.counters.documents_downloaded, 1);
    assert_eq!(snapshot.task.counters.bytes_downloaded, 4096);
    assert_eq!(snapshot.files.len(), 1);
    assert_eq!(snapshot.files[0].filename, "report.pdf");
    assert_eq!(
        blobs.keys(),
        vec![format!("user-1/{}/report.pdf", task.id)]
    );

    // Every URL fetched exactly once
    let mut fetched = requests_matching(&server, "/").await;
    fetched.sort();
    assert_eq!(fetched, vec!["/", "/files/report.pdf", "/page1", "/page2"]);
}

#[tokio::test]
async fn test_html_served_as_plain_text_is_crawled() {
    let server = MockServer::start().await;

    // set_body_string always answers with text/plain
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(page("Home", &["/about".to_string()])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html_response(page("About", &[])))
        .mount(&server)
        .await;

    let (manager, blobs) = memory_manager(test_config(), direct_provider());

    let task = manager.create("user-1", &server.uri()).await.unwrap();
    manager.start(task.id).await.unwrap();
    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.pages_visited, 2);
    assert_eq!(snapshot.task.counters.documents_downloaded, 0);
    assert!(snapshot.task.error_summary.is_empty());
    assert!(blobs.keys().is_empty());
}

#[tokio::test]
async fn test_max_pages_bound() {
    let server = MockServer::start().await;
    let links: Vec<String> = (0..20).map(|i| format!("/p{}", i)).collect();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(page("Hub", &links)))
        .mount(&server)
        .await;

    let leaf_links = links.clone();
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d+$"))
        .respond_with(move |_: &Request| html_response(page("Leaf", &leaf_links)))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.crawl.max_workers = 8;
    let limits = limits(&config, 5, 10, 5);
    let policy = config.default_policy();
    let (manager, _) = memory_manager(config, direct_provider());

    let task = manager
        .create_with("user-1", &server.uri(), limits, policy)
        .await
        .unwrap();
    manager.start(task.id).await.unwrap();
    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.pages_visited, 5);
    assert_eq!(requests_matching(&server, "/p").await.len(), 4);
}

#[tokio::test]
async fn test_depth_bound_on_endless_chain() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/d/\d+$"))
        .respond_with(|request: &Request| {
            let n: u32 = request
                .url
                .path()
                .trim_start_matches("/d/")
                .parse()
                .unwrap_or(0);
            html_response(page("Chain", &[format!("/d/{}", n + 1)]))
        })
        .mount(&server)
        .await;

    let config = test_config();
    let limits = limits(&config, 100, 10, 3);
    let policy = config.default_policy();
    let (manager, _) = memory_manager(config, direct_provider());

    let seed = format!("{}/d/0", server.uri());
    let task = manager.create_with("user-1", &seed, limits, policy).await.unwrap();
    manager.start(task.id).await.unwrap();
    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.pages_visited, 4);

    let mut fetched = requests_matching(&server, "/d/").await;
    fetched.sort();
    assert_eq!(fetched, vec!["/d/0", "/d/1", "/d/2", "/d/3"]);
}

#[tokio::test]
async fn test_cancellation_drains_in_flight_fetches() {
    let server = MockServer::start().await;
    let links: Vec<String> = (0..30).map(|i| format!("/slow/{}", i)).collect();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(page("Hub", &links)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/slow/\d+$"))
        .respond_with(html_response(page("Slow", &[])).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let config = test_config();
    let (manager, _) = memory_manager(config, direct_provider());

    let task = manager.create("user-1", &server.uri()).await.unwrap();
    manager.start(task.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.cancel(task.id).await.unwrap(), TaskStatus::Running);

    let snapshot = manager.wait(task.id).await.unwrap();
    assert_eq!(snapshot.task.status, TaskStatus::Cancelled);
    assert!(snapshot.task.counters.pages_visited < 31);

    // Nothing new is dispatched once the drain is over
    let fetched = requests_matching(&server, "/slow/").await.len();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(requests_matching(&server, "/slow/").await.len(), fetched);
}

#[tokio::test]
async fn test_document_errors_are_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(page(
            "Docs",
            &[
                "/missing.pdf".to_string(),
                "/tiny.pdf".to_string(),
                "/good.pdf".to_string(),
            ],
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tiny.pdf"))
        .respond_with(pdf_response(100))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/good.pdf"))
        .respond_with(pdf_response(2048))
        .mount(&server)
        .await;

    let (manager, blobs) = memory_manager(test_config(), direct_provider());

    let task = manager.create("user-1", &server.uri()).await.unwrap();
    manager.start(task.id).await.unwrap();
    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.documents_downloaded, 1);
    assert_eq!(snapshot.task.error_summary.get(&ErrorKind::DownloadFailed), Some(&1));
    assert_eq!(snapshot.task.error_summary.get(&ErrorKind::TooSmall), Some(&1));
    assert_eq!(blobs.keys().len(), 1);
}

#[tokio::test]
async fn test_escalates_through_provider_api() {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&format!("{}/api/v1/", server.uri())).unwrap();

    // Without rendering only an empty application shell comes back
    Mock::given(method("GET"))
        .and(path("/api/v1/"))
        .and(query_param("render_js", "false"))
        .respond_with(html_response(
            "<html><body><div id=\"app\"></div></body></html>".to_string(),
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/"))
        .and(query_param("render_js", "true"))
        .and(query_param("api_key", "test-key"))
        .and(query_param("url", "https://target.example.test/"))
        .respond_with(html_response(page("Rendered", &[])))
        .mount(&server)
        .await;

    let client = build_http_client("escalade-tests/0.1").unwrap();
    let provider: Arc<dyn FetchProvider> =
        Arc::new(ApiFetchProvider::new(client, endpoint, "test-key"));
    let (manager, _) = memory_manager(test_config(), provider);

    let task = manager
        .create("user-1", "https://target.example.test/")
        .await
        .unwrap();
    manager.start(task.id).await.unwrap();
    let snapshot = manager.wait(task.id).await.unwrap();

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(snapshot.task.counters.pages_visited, 1);

    let usage = snapshot.usage.expect("usage is kept for finished runs");
    let attempts = |tier: Tier| {
        usage
            .per_tier
            .iter()
            .find(|t| t.tier == tier)
            .map(|t| t.attempts)
            .unwrap_or(0)
    };
    assert_eq!(attempts(Tier::Basic), 1);
    assert_eq!(attempts(Tier::Rendered), 1);
    assert_eq!(attempts(Tier::Premium), 0);
    assert_eq!(attempts(Tier::Stealth), 0);
}

#[tokio::test]
async fn test_persists_to_sqlite_and_filesystem() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("escalade.db");
    let blob_root = dir.path().join("documents");

    let store = Arc::new(SqliteTaskStore::new(&db_path).unwrap());
    let manager = TaskManager::new(
        test_config(),
        direct_provider(),
        store,
        Arc::new(FsBlobStore::new(blob_root.clone())),
        Arc::new(NullDocumentSink),
    );

    let task = manager.create("user-9", &server.uri()).await.unwrap();
    manager.start(task.id).await.unwrap();
    manager.wait(task.id).await.unwrap();

    // A fresh connection sees the committed terminal record
    let reopened = SqliteTaskStore::new(&db_path).unwrap();
    let stored = reopened.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.counters.pages_visited, 3);

    let files = reopened.list_files(task.id).await.unwrap();
    assert_eq!(files.len(), 1);
    let blob_path = blob_root.join(&files[0].storage_key);
    assert_eq!(std::fs::metadata(&blob_path).unwrap().len(), 4096);

    manager.delete(task.id).await.unwrap();
    assert!(!blob_path.exists());
    assert!(reopened.get_task(task.id).await.unwrap().is_none());
}
