use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use signed_url_cache::config::{DownloadUrlConfig, PreviewUrlConfig};
use signed_url_cache::{Config, FnSigner, ManualClock, NormalizedKey, SignError, SignedUrlCache};
use signed_url_test::setup;
use tokio::sync::Notify;

fn config() -> Config {
    Config {
        preview: PreviewUrlConfig {
            expires_in: 10,
            buffer_seconds: 2,
        },
        download: DownloadUrlConfig {
            expires_in: 10,
            buffer_seconds: 1,
        },
        ..Default::default()
    }
}

/// Counts upstream calls. Download requests wait until `release` is notified.
#[derive(Default)]
struct Upstream {
    previews: AtomicUsize,
    downloads: AtomicUsize,
    release: Notify,
}

fn signer(upstream: &Arc<Upstream>) -> FnSigner {
    let preview = {
        let upstream = Arc::clone(upstream);
        move |key: NormalizedKey| {
            let n = upstream.previews.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, SignError>(format!("https://storage.test/{key}?v={n}")) }
        }
    };
    let download = {
        let upstream = Arc::clone(upstream);
        move |key: NormalizedKey| {
            let upstream = Arc::clone(&upstream);
            let n = upstream.downloads.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                upstream.release.notified().await;
                Ok::<_, SignError>(format!("https://storage.test/{key}?download&v={n}"))
            }
        }
    };
    FnSigner::new(preview, download)
}

#[tokio::test]
async fn test_preview_refresh_after_expiry() {
    setup();
    let clock = ManualClock::new(0);
    let upstream = Arc::new(Upstream::default());
    let cache = SignedUrlCache::with_clock(signer(&upstream), &config(), clock.clone());

    let first = cache
        .get_preview_url("insurance-documents/policy.pdf")
        .await
        .unwrap();
    assert_eq!(first, "https://storage.test/policy.pdf?v=1");
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 1);

    let second = cache.get_preview_url("policy.pdf").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(9_000));
    let third = cache.get_preview_url("policy.pdf").await.unwrap();
    assert_eq!(third, "https://storage.test/policy.pdf?v=2");
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_buffer_boundary() {
    setup();
    let clock = ManualClock::new(0);
    let upstream = Arc::new(Upstream::default());
    let cache = SignedUrlCache::with_clock(signer(&upstream), &config(), clock.clone());

    cache.get_preview_url("a.pdf").await.unwrap();

    clock.set(7_999);
    cache.get_preview_url("a.pdf").await.unwrap();
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 1);

    clock.set(8_001);
    cache.get_preview_url("a.pdf").await.unwrap();
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simultaneous_downloads() {
    setup();
    let upstream = Arc::new(Upstream::default());
    let cache = Arc::new(SignedUrlCache::with_clock(
        signer(&upstream),
        &config(),
        ManualClock::new(0),
    ));

    let first = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get_download_url("insurance-documents/report.pdf").await }
    });
    let second = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get_download_url("report.pdf").await }
    });

    // Wait until the upstream request is in flight before letting it finish.
    while upstream.downloads.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    upstream.release.notify_one();

    let expected = "https://storage.test/report.pdf?download&v=1";
    assert_eq!(first.await.unwrap().unwrap(), expected);
    assert_eq!(second.await.unwrap().unwrap(), expected);
    assert_eq!(upstream.downloads.load(Ordering::SeqCst), 1);

    assert_eq!(cache.get_download_url("report.pdf").await.unwrap(), expected);
    assert_eq!(upstream.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.previews.load(Ordering::SeqCst), 0);
}
