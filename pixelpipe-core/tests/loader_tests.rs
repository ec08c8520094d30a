//! End-to-end tests of request execution through `ImageLoader`
//!
//! These tests verify:
//! - Memory cache hits and size validity
//! - HTTP cache-control handling of the disk cache
//! - Conditional requests and 304 header merging
//! - Deduplication of concurrent identical requests
//! - The interceptor identity contract

mod common;

use async_trait::async_trait;
use common::*;
use pixelpipe_core::{
    CachedResponseMetadata, Chain, CoordinationPolicy, DataSource, ErrorResult, ImageLoader,
    ImageRequest, ImageResult, Interceptor, LoaderConfig, ManualClock, PipelineError, Result,
    Size, Target,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const URL: &str = "https://images.example.com/cat.png";

fn loader(client: &Arc<ScriptedClient>, clock: &Arc<ManualClock>, config: LoaderConfig) -> ImageLoader {
    init_tracing();
    ImageLoader::builder()
        .config(config)
        .network_client(Arc::clone(client) as _)
        .clock(Arc::clone(clock) as _)
        .add_decoder(Arc::new(BytesDecoderFactory))
        .build()
        .unwrap()
}

/// Disk cache only, so every request reaches the disk layer
fn disk_only(dir: &TempDir) -> LoaderConfig {
    LoaderConfig::builder()
        .memory_cache_max_bytes(0)
        .disk_cache_dir(dir.path())
        .build()
}

fn success(result: ImageResult) -> pixelpipe_core::SuccessResult {
    match result {
        ImageResult::Success(success) => success,
        ImageResult::Error(error) => panic!("request failed: {}", error.error),
    }
}

#[tokio::test]
async fn test_memory_cache_hit_reports_memory_cache() {
    let client = Arc::new(ScriptedClient::new(vec![response(
        200,
        &[("Content-Type", "image/png")],
        b"pixels",
    )]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, LoaderConfig::default());

    let first = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(first.data_source, DataSource::Network);
    assert!(first.memory_cache_key.is_some());

    let second = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(second.data_source, DataSource::MemoryCache);
    assert_eq!(second.memory_cache_key, first.memory_cache_key);
    assert!(Arc::ptr_eq(&first.image, &second.image));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_cached_image_is_reused_only_for_matching_size() {
    let client = Arc::new(ScriptedClient::new(vec![
        response(200, &[], b"a"),
        response(200, &[], b"a"),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, LoaderConfig::default());

    let request = |size| ImageRequest::builder(URL).size(size).build();

    let first = success(loader.execute(request(Size::new(100, 100))).await);
    assert_eq!((first.image.width(), first.image.height()), (100, 100));

    let same = success(loader.execute(request(Size::new(100, 100))).await);
    assert_eq!(same.data_source, DataSource::MemoryCache);

    let larger = success(loader.execute(request(Size::new(150, 150))).await);
    assert_eq!(larger.data_source, DataSource::Network);
    assert_eq!(larger.image.width(), 150);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_no_store_response_never_reaches_disk() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(ScriptedClient::new(vec![
        response(200, &[("Cache-Control", "no-store")], b"secret"),
        response(200, &[("Cache-Control", "no-store")], b"secret"),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, disk_only(&dir));

    let first = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(first.data_source, DataSource::Network);
    assert_eq!(first.image.width(), 6);

    let disk = loader.disk_cache().unwrap();
    assert!(disk.open_snapshot(URL).unwrap().is_none());
    assert!(disk.is_empty());

    success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_max_age_is_served_from_disk_until_stale() {
    let dir = TempDir::new().unwrap();
    let date = http_date(T0);
    let later = http_date(T0 + 65_000);
    let client = Arc::new(ScriptedClient::new(vec![
        response(
            200,
            &[("Cache-Control", "max-age=60"), ("Date", date.as_str())],
            b"v1",
        ),
        response(
            200,
            &[("Cache-Control", "max-age=60"), ("Date", later.as_str())],
            b"v2-new",
        ),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, disk_only(&dir));

    let first = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(first.data_source, DataSource::Network);
    assert_eq!(first.disk_cache_key.as_deref(), Some(URL));

    clock.advance_secs(30);
    let fresh = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(fresh.data_source, DataSource::Disk);
    assert_eq!(fresh.image.width(), 2);
    assert_eq!(client.calls(), 1);

    clock.advance_secs(35);
    let refetched = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(refetched.data_source, DataSource::Network);
    assert_eq!(refetched.image.width(), 6);
    assert_eq!(client.calls(), 2);

    // The replacement is what the disk cache now holds
    let snapshot = loader.disk_cache().unwrap().open_snapshot(URL).unwrap().unwrap();
    assert_eq!(snapshot.read_data().unwrap(), b"v2-new");
}

#[tokio::test]
async fn test_not_modified_merges_headers_and_keeps_body() {
    let dir = TempDir::new().unwrap();
    let date = http_date(T0);
    let revalidated = http_date(T0 + 20_000);
    let client = Arc::new(ScriptedClient::new(vec![
        response(
            200,
            &[
                ("Content-Type", "image/png"),
                ("Cache-Control", "max-age=10"),
                ("ETag", "\"v1\""),
                ("Date", date.as_str()),
                ("X-Revision", "1"),
            ],
            b"abc",
        ),
        response(
            304,
            &[
                ("Cache-Control", "max-age=10"),
                ("ETag", "\"v1\""),
                ("Date", revalidated.as_str()),
                ("X-Revision", "2"),
            ],
            b"",
        ),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, disk_only(&dir));

    success(loader.execute(ImageRequest::new(URL)).await);

    clock.advance_secs(20);
    let result = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!(result.data_source, DataSource::Network);
    assert_eq!(result.image.width(), 3);

    let conditional = client.request(1);
    assert_eq!(conditional.headers.get("If-None-Match"), Some("\"v1\""));

    let snapshot = loader.disk_cache().unwrap().open_snapshot(URL).unwrap().unwrap();
    assert_eq!(snapshot.read_data().unwrap(), b"abc");
    let metadata = CachedResponseMetadata::from_bytes(&snapshot.read_metadata().unwrap()).unwrap();
    assert_eq!(metadata.headers.get("X-Revision"), Some("2"));
    assert_eq!(metadata.headers.get("Content-Type"), Some("image/png"));
    assert_eq!(metadata.headers.get("Date"), Some(revalidated.as_str()));
    assert_eq!(metadata.received_at_millis, T0 + 20_000);
}

#[tokio::test]
async fn test_offline_request_fails_without_cached_copy() {
    let client = Arc::new(ScriptedClient::new(vec![]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, LoaderConfig::default());

    let request = ImageRequest::builder(URL)
        .network_cache_policy(pixelpipe_core::CachePolicy::Disabled)
        .build();
    let result = loader.execute(request).await;
    assert!(matches!(result.error(), Some(PipelineError::NetworkDisabled(_))));
    assert_eq!(client.calls(), 0);
}

async fn run_concurrently(policy: CoordinationPolicy, expected_calls: usize) -> Vec<ImageResult> {
    let client = Arc::new(ScriptedClient::gated(vec![
        response(200, &[], b"shared"),
        response(200, &[], b"shared"),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let config = LoaderConfig::builder().coordination(policy).build();
    let loader = loader(&client, &clock, config);

    let first = loader.enqueue(ImageRequest::new(URL));
    until(|| client.calls() == 1).await;
    let second = loader.enqueue(ImageRequest::new(URL));
    settle().await;

    assert_eq!(client.calls(), expected_calls);
    client.release(expected_calls);

    let results = vec![within(first.join()).await, within(second.join()).await];
    assert_eq!(client.calls(), expected_calls);
    results
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_fetch() {
    let results = run_concurrently(CoordinationPolicy::Deduplicate, 1).await;
    let images: Vec<_> = results.into_iter().map(|r| success(r).image).collect();
    assert!(Arc::ptr_eq(&images[0], &images[1]));
}

#[tokio::test]
async fn test_uncoordinated_requests_fetch_independently() {
    let results = run_concurrently(CoordinationPolicy::Uncoordinated, 2).await;
    assert!(results.iter().all(ImageResult::is_success));
}

#[tokio::test]
async fn test_failed_leader_is_replaced_by_one_waiter() {
    let client = Arc::new(ScriptedClient::gated(vec![
        response(500, &[], b""),
        response(200, &[], b"retry"),
    ]));
    let clock = Arc::new(ManualClock::new(T0));
    let loader = loader(&client, &clock, LoaderConfig::default());

    let leader = loader.enqueue(ImageRequest::new(URL));
    until(|| client.calls() == 1).await;
    let waiters = vec![
        loader.enqueue(ImageRequest::new(URL)),
        loader.enqueue(ImageRequest::new(URL)),
    ];
    settle().await;
    assert_eq!(client.calls(), 1);

    client.release(1);
    let failed = within(leader.join()).await;
    assert!(matches!(
        failed.error(),
        Some(PipelineError::HttpStatus { code: 500, .. })
    ));

    until(|| client.calls() == 2).await;
    client.release(1);
    for waiter in waiters {
        let result = success(within(waiter.join()).await);
        assert_eq!(result.image.width(), 5);
    }
    assert_eq!(client.calls(), 2);
}

#[derive(Default)]
struct RecordingTarget {
    errors: AtomicUsize,
}

impl Target for RecordingTarget {
    fn on_error(&self, _result: &ErrorResult) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct TargetSwapper;

#[async_trait]
impl Interceptor for TargetSwapper {
    async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
        let mut request = chain.request().clone();
        request.target = Some(Arc::new(RecordingTarget::default()));
        chain.proceed(request).await
    }
}

struct Resizer;

#[async_trait]
impl Interceptor for Resizer {
    async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
        let request = chain.request().clone();
        chain.with_size(Size::new(7, 7)).proceed(request).await
    }
}

#[tokio::test]
async fn test_interceptor_replacing_target_is_rejected() {
    let client = Arc::new(ScriptedClient::new(vec![response(200, &[], b"x")]));
    let loader = ImageLoader::builder()
        .network_client(Arc::clone(&client) as _)
        .add_decoder(Arc::new(BytesDecoderFactory))
        .add_interceptor(Arc::new(TargetSwapper))
        .build()
        .unwrap();

    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::builder(URL)
        .target(Arc::clone(&target) as Arc<dyn Target>)
        .build();
    let result = loader.execute(request).await;

    let error = result.error().expect("contract violation should fail");
    assert!(error.to_string().contains("TargetSwapper"));
    assert!(matches!(
        error,
        PipelineError::InterceptorContract { field: "target", .. }
    ));
    assert_eq!(target.errors.load(Ordering::SeqCst), 1);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_interceptor_may_change_size() {
    let client = Arc::new(ScriptedClient::new(vec![response(200, &[], b"x")]));
    let loader = ImageLoader::builder()
        .network_client(Arc::clone(&client) as _)
        .add_decoder(Arc::new(BytesDecoderFactory))
        .add_interceptor(Arc::new(Resizer))
        .build()
        .unwrap();

    let result = success(loader.execute(ImageRequest::new(URL)).await);
    assert_eq!((result.image.width(), result.image.height()), (7, 7));
}
