use std::time::Duration;

use signed_url_cache::config::StorageConfig;
use signed_url_cache::{Config, ManualClock, SignError, SignedUrlCache, StorageSigner};
use signed_url_test::{STORAGE_TOKEN, SigningServer, setup};

fn config(server: &SigningServer) -> Config {
    Config {
        storage: StorageConfig {
            url: Some(server.storage_url()),
            token: Some(STORAGE_TOKEN.into()),
            timeout: Duration::from_secs(5),
            download_filename: None,
        },
        ..Default::default()
    }
}

fn cache(config: &Config) -> SignedUrlCache {
    let signer = StorageSigner::from_config(config).unwrap();
    SignedUrlCache::with_clock(signer, config, ManualClock::new(0))
}

#[tokio::test]
async fn test_preview_url() {
    setup();
    let server = SigningServer::new();
    let cache = cache(&config(&server));

    let url = cache
        .get_preview_url("insurance-documents/claims/policy.pdf")
        .await
        .unwrap();
    let expected = server.storage_url().to_string()
        + "/object/sign/insurance-documents/claims/policy.pdf?token=t1&expiresIn=3600";
    assert_eq!(url, expected);

    assert_eq!(cache.get_preview_url("claims/policy.pdf").await.unwrap(), url);
    assert_eq!(server.hits("insurance-documents", "claims/policy.pdf"), 1);
}

#[tokio::test]
async fn test_download_url() {
    setup();
    let server = SigningServer::new();
    let mut config = config(&server);
    let cache_without_name = cache(&config);
    config.storage.download_filename = Some("report.pdf".into());
    let cache_with_name = cache(&config);

    let url = cache_without_name.get_download_url("report.pdf").await.unwrap();
    let expected = "/object/sign/insurance-documents/report.pdf?token=t1&expiresIn=300&download=";
    assert!(url.ends_with(expected), "{url}");

    let url = cache_with_name.get_download_url("report.pdf").await.unwrap();
    assert!(url.ends_with("?token=t2&expiresIn=300&download=report.pdf"), "{url}");
}

#[tokio::test]
async fn test_preview_and_download_are_signed_separately() {
    setup();
    let server = SigningServer::new();
    let cache = cache(&config(&server));

    let (preview, download) = futures::join!(
        cache.get_preview_url("policy.pdf"),
        cache.get_download_url("policy.pdf"),
    );
    assert!(preview.unwrap().contains("expiresIn=3600"));
    assert!(download.unwrap().contains("expiresIn=300"));
    assert_eq!(server.hits("insurance-documents", "policy.pdf"), 2);
}

#[tokio::test]
async fn test_coalesces_slow_requests() {
    setup();
    let server = SigningServer::new();
    let cache = cache(&config(&server));

    let results = futures::future::join_all(
        ["slow/a.pdf", "insurance-documents/slow/a.pdf", "/slow/a.pdf"]
            .into_iter()
            .cycle()
            .take(12)
            .map(|key| cache.get_preview_url(key)),
    )
    .await;

    let first = results[0].clone().unwrap();
    assert!(results.iter().all(|res| res.as_ref() == Ok(&first)));
    assert_eq!(server.hits("insurance-documents", "slow/a.pdf"), 1);
}

#[tokio::test]
async fn test_upstream_errors() {
    setup();
    let server = SigningServer::new();
    let cache = cache(&config(&server));

    assert_eq!(
        cache.get_preview_url("missing/a.pdf").await,
        Err(SignError::NotFound)
    );
    assert!(matches!(
        cache.get_preview_url("garbage/a.pdf").await,
        Err(SignError::Malformed(_))
    ));
    match cache.get_download_url("error/a.pdf").await {
        Err(SignError::Upstream(details)) => assert!(details.contains("500"), "{details}"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_failures_are_retried() {
    setup();
    let server = SigningServer::new();
    let cache = cache(&config(&server));

    for _ in 0..3 {
        assert!(cache.get_preview_url("error/a.pdf").await.is_err());
    }
    assert_eq!(server.hits("insurance-documents", "error/a.pdf"), 3);
}

#[tokio::test]
async fn test_invalid_token() {
    setup();
    let server = SigningServer::new();
    let mut config = config(&server);
    config.storage.token = Some("wrong".into());
    let cache = cache(&config);

    assert_eq!(
        cache.get_preview_url("policy.pdf").await,
        Err(SignError::PermissionDenied("invalid signature".into()))
    );
    assert_eq!(server.accesses(), 1);

    // Rejections are not cached, the next request is sent again.
    assert!(cache.get_download_url("policy.pdf").await.is_err());
    assert!(cache.get_preview_url("policy.pdf").await.is_err());
    assert_eq!(server.accesses(), 3);
}

#[tokio::test]
async fn test_timeout() {
    setup();
    let server = SigningServer::new();
    let mut config = config(&server);
    config.storage.timeout = Duration::from_millis(20);
    let cache = cache(&config);

    assert_eq!(
        cache.get_preview_url("slow/a.pdf").await,
        Err(SignError::Timeout(Duration::from_millis(20)))
    );
}
