//! Integration tests for the full ingestion pipeline.
//!
//! These tests drive the coordinator end-to-end against mock HTTP servers:
//! fetch, extraction, content deduplication, image normalization and the
//! SQLite-backed store.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use raito_ingest::dedup::Fingerprint;
use raito_ingest::extract::{DraftRecord, Ruleset};
use raito_ingest::pipeline::{Coordinator, CoordinatorConfig, FailureKind, IngestOutcome};
use raito_ingest::store::{NewAsset, PutOutcome, RecordStore, Store, StoreError, StoredRecord};
use raito_ingest::Database;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a small deterministic test image encoded as PNG.
fn test_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 31 % 256) as u8, (y * 17 % 256) as u8, 200, 255])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("PNG encoding should succeed");
    out
}

/// Mounts an HTML page at the given path.
async fn serve_html(server: &MockServer, path_str: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Mounts a PNG image at the given path.
async fn serve_png(server: &MockServer, path_str: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes, "image/png"))
        .mount(server)
        .await;
}

/// Ruleset matching the article fixture pages used throughout these tests.
fn article_ruleset() -> Ruleset {
    serde_json::from_str(
        r#"{
            "fields": [
                {"name": "title", "selector": "h1.title"},
                {"name": "author", "selector": "span.author"}
            ],
            "assets": [
                {"selector": "img.cover", "attribute": "src"}
            ]
        }"#,
    )
    .expect("fixture ruleset should parse")
}

fn article_html(title: &str, image_path: &str) -> String {
    format!(
        r#"<html><body>
            <h1 class="title">{title}</h1>
            <span class="author">A. Writer</span>
            <img class="cover" src="{image_path}">
        </body></html>"#
    )
}

async fn coordinator_with_store(config: CoordinatorConfig) -> (Arc<Coordinator>, Arc<Store>) {
    let db = Database::new_in_memory().await.expect("in-memory database");
    let store = Arc::new(Store::new(db));
    let coordinator = Coordinator::with_record_store(Arc::clone(&store) as Arc<dyn RecordStore>, config)
        .expect("coordinator should build");
    (Arc::new(coordinator), store)
}

#[tokio::test]
async fn test_ingest_page_with_image_stores_record_and_asset() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("First Post", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/article", server.uri()), &ruleset)
        .await;

    let IngestOutcome::Stored { record_id } = outcome else {
        panic!("expected Stored, got {outcome:?}");
    };
    assert!(record_id > 0);
    assert_eq!(store.count_records().await.expect("count"), 1);
    assert_eq!(store.count_assets().await.expect("count"), 1);
    assert_eq!(coordinator.stats().stored(), 1);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_resubmitting_identical_content_is_a_duplicate() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("Same Post", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");
    let uri = format!("{}/article", server.uri());

    let first = coordinator.submit(&uri, &ruleset).await;
    let second = coordinator.submit(&uri, &ruleset).await;

    let IngestOutcome::Stored { record_id } = first else {
        panic!("expected Stored, got {first:?}");
    };
    assert_eq!(second, IngestOutcome::Duplicate { record_id });
    assert_eq!(store.count_records().await.expect("count"), 1);
    assert_eq!(coordinator.stats().duplicate(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_content_stores_exactly_once() {
    let server = MockServer::start().await;
    // Two distinct URIs serving byte-identical content
    let html = article_html("Mirrored Post", "/cover.png");
    serve_html(&server, "/mirror-a", &html).await;
    serve_html(&server, "/mirror-b", &html).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = Arc::new(article_ruleset().compile().expect("ruleset compiles"));

    let outcomes = coordinator
        .submit_many(
            vec![
                format!("{}/mirror-a", server.uri()),
                format!("{}/mirror-b", server.uri()),
            ],
            ruleset,
        )
        .await;

    let stored: Vec<i64> = outcomes
        .iter()
        .filter_map(|o| match o {
            IngestOutcome::Stored { record_id } => Some(*record_id),
            _ => None,
        })
        .collect();
    let duplicates: Vec<i64> = outcomes
        .iter()
        .filter_map(|o| match o {
            IngestOutcome::Duplicate { record_id } => Some(*record_id),
            _ => None,
        })
        .collect();

    assert_eq!(stored.len(), 1, "exactly one Stored: {outcomes:?}");
    assert_eq!(duplicates.len(), 1, "exactly one Duplicate: {outcomes:?}");
    assert_eq!(stored[0], duplicates[0], "both resolve to the same record");
    assert_eq!(store.count_records().await.expect("count"), 1);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_same_image_on_two_pages_stores_one_asset() {
    let server = MockServer::start().await;
    serve_html(&server, "/a", &article_html("Post A", "/shared.png")).await;
    serve_html(&server, "/b", &article_html("Post B", "/shared.png")).await;
    serve_png(&server, "/shared.png", test_png(10, 10)).await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = Arc::new(article_ruleset().compile().expect("ruleset compiles"));

    let outcomes = coordinator
        .submit_many(
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            ruleset,
        )
        .await;

    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, IngestOutcome::Stored { .. })),
        "both pages are distinct records: {outcomes:?}"
    );
    assert_eq!(store.count_records().await.expect("count"), 2);
    // Pixel-identical asset is shared, not duplicated
    assert_eq!(store.count_assets().await.expect("count"), 1);
}

#[tokio::test]
async fn test_malformed_html_still_extracts() {
    let server = MockServer::start().await;
    // Unclosed tags and stray markup; a lenient parser recovers
    serve_html(
        &server,
        "/broken",
        r#"<html><body><h1 class="title">Still Works<span class="author">B. Writer</body>"#,
    )
    .await;

    let (coordinator, _store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/broken", server.uri()), &ruleset)
        .await;

    assert!(
        matches!(outcome, IngestOutcome::Stored { .. }),
        "lenient parsing should recover: {outcome:?}"
    );
}

#[tokio::test]
async fn test_not_found_fails_as_client_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/missing", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::FetchClientRejected
        }
    );
    assert_eq!(store.count_records().await.expect("count"), 0);
}

#[tokio::test]
async fn test_transient_server_error_is_retried_to_success() {
    let server = MockServer::start().await;
    // First response is a 503, every later one succeeds
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    serve_html(&server, "/flaky", &article_html("Flaky Post", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let (coordinator, _store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/flaky", server.uri()), &ruleset)
        .await;

    assert!(
        matches!(outcome, IngestOutcome::Stored { .. }),
        "fetch should retry past the 503: {outcome:?}"
    );
}

#[tokio::test]
async fn test_non_html_payload_fails_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(vec![0u8, 159, 146, 150]),
        )
        .mount(&server)
        .await;

    let (coordinator, _store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/data.bin", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::ExtractUnparsable
        }
    );
}

#[tokio::test]
async fn test_oversized_image_fails_without_storing() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("Big Image", "/huge.png")).await;
    serve_png(&server, "/huge.png", test_png(16, 16)).await;

    let config = CoordinatorConfig {
        // 16x16 = 256 pixels, over this bound
        max_pixel_area: 64,
        ..CoordinatorConfig::default()
    };
    let (coordinator, store) = coordinator_with_store(config).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/article", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::ImageTooLarge
        }
    );
    // Nothing partial lands in the store
    assert_eq!(store.count_records().await.expect("count"), 0);
    assert_eq!(store.count_assets().await.expect("count"), 0);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_broken_asset_fails_the_whole_run() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("Dead Link", "/gone.png")).await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/article", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::FetchClientRejected
        }
    );
    assert_eq!(store.count_records().await.expect("count"), 0);
}

#[tokio::test]
async fn test_page_without_assets_stores_record_only() {
    let server = MockServer::start().await;
    serve_html(
        &server,
        "/plain",
        r#"<html><body><h1 class="title">No Pictures</h1></body></html>"#,
    )
    .await;

    let (coordinator, store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/plain", server.uri()), &ruleset)
        .await;

    assert!(matches!(outcome, IngestOutcome::Stored { .. }));
    assert_eq!(store.count_records().await.expect("count"), 1);
    assert_eq!(store.count_assets().await.expect("count"), 0);
}

/// Store wrapper whose first `put` fails with a transaction error, to
/// exercise the coordinator's single persist retry.
struct FlakyStore {
    inner: Store,
    puts: AtomicUsize,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn put(
        &self,
        record: &DraftRecord,
        fingerprint: Fingerprint,
        assets: &[NewAsset],
    ) -> Result<PutOutcome, StoreError> {
        if self.puts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::transaction_failed("injected commit failure"));
        }
        self.inner.put(record, fingerprint, assets).await
    }

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.get(fingerprint).await
    }

    async fn contains(&self, fingerprint: Fingerprint) -> Result<bool, StoreError> {
        self.inner.contains(fingerprint).await
    }
}

#[tokio::test]
async fn test_persist_failure_is_retried_once_and_succeeds() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("Retry Me", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let db = Database::new_in_memory().await.expect("in-memory database");
    let flaky = Arc::new(FlakyStore {
        inner: Store::new(db),
        puts: AtomicUsize::new(0),
    });
    let coordinator = Coordinator::with_record_store(
        Arc::clone(&flaky) as Arc<dyn RecordStore>,
        CoordinatorConfig::default(),
    )
    .expect("coordinator should build");
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/article", server.uri()), &ruleset)
        .await;

    assert!(
        matches!(outcome, IngestOutcome::Stored { .. }),
        "persist retry should recover: {outcome:?}"
    );
    assert_eq!(flaky.puts.load(Ordering::SeqCst), 2, "exactly one retry");
}

/// Store wrapper whose `put` always fails, to show the retry is bounded.
struct BrokenStore {
    inner: Store,
    puts: AtomicUsize,
}

#[async_trait]
impl RecordStore for BrokenStore {
    async fn put(
        &self,
        _record: &DraftRecord,
        _fingerprint: Fingerprint,
        _assets: &[NewAsset],
    ) -> Result<PutOutcome, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::transaction_failed("injected commit failure"))
    }

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.get(fingerprint).await
    }

    async fn contains(&self, fingerprint: Fingerprint) -> Result<bool, StoreError> {
        self.inner.contains(fingerprint).await
    }
}

#[tokio::test]
async fn test_persistent_persist_failure_stops_after_one_retry() {
    let server = MockServer::start().await;
    serve_html(&server, "/article", &article_html("Never Lands", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;

    let db = Database::new_in_memory().await.expect("in-memory database");
    let broken = Arc::new(BrokenStore {
        inner: Store::new(db),
        puts: AtomicUsize::new(0),
    });
    let coordinator = Coordinator::with_record_store(
        Arc::clone(&broken) as Arc<dyn RecordStore>,
        CoordinatorConfig::default(),
    )
    .expect("coordinator should build");
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/article", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::StoreTransactionFailed
        }
    );
    assert_eq!(broken.puts.load(Ordering::SeqCst), 2, "initial put plus one retry");
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_expired_deadline_is_classified_as_cancelled() {
    let server = MockServer::start().await;
    // Respond slower than the configured deadline
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>slow</body></html>", "text/html")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = CoordinatorConfig {
        deadline: Some(std::time::Duration::from_millis(100)),
        ..CoordinatorConfig::default()
    };
    let (coordinator, store) = coordinator_with_store(config).await;
    let ruleset = article_ruleset().compile().expect("ruleset compiles");

    let outcome = coordinator
        .submit(&format!("{}/slow", server.uri()), &ruleset)
        .await;

    assert_eq!(
        outcome,
        IngestOutcome::Failed {
            kind: FailureKind::Cancelled
        }
    );
    assert_eq!(store.count_records().await.expect("count"), 0);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_batch_outcomes_preserve_submission_order() {
    let server = MockServer::start().await;
    serve_html(&server, "/ok", &article_html("Ordered", "/cover.png")).await;
    serve_png(&server, "/cover.png", test_png(8, 6)).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (coordinator, _store) = coordinator_with_store(CoordinatorConfig::default()).await;
    let ruleset = Arc::new(article_ruleset().compile().expect("ruleset compiles"));

    let outcomes = coordinator
        .submit_many(
            vec![
                format!("{}/missing", server.uri()),
                format!("{}/ok", server.uri()),
            ],
            ruleset,
        )
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0],
        IngestOutcome::Failed {
            kind: FailureKind::FetchClientRejected
        }
    );
    assert!(matches!(outcomes[1], IngestOutcome::Stored { .. }));
}
