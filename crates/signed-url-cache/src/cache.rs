use std::sync::Arc;

use futures::FutureExt;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ExpirationPolicy};
use crate::error::SignError;
use crate::key::{KeyNormalizer, NormalizedKey};
use crate::namespace::{FetchFn, UrlNamespace};
use crate::signer::{UrlKind, UrlSigner};

/// Hands out signed preview and download URLs, calling the [`UrlSigner`] only when needed.
///
/// Preview and download URLs live in two independent [`UrlNamespace`]s with their own
/// expiration policy, so a cached preview URL never answers a download request for the same
/// object and vice versa.
#[derive(Debug)]
pub struct SignedUrlCache {
    normalizer: KeyNormalizer,
    preview: UrlNamespace,
    download: UrlNamespace,
}

impl SignedUrlCache {
    /// Creates a cache backed by `signer`, using the wall clock.
    pub fn new<S: UrlSigner>(signer: S, config: &Config) -> Self {
        Self::with_clock(signer, config, SystemClock)
    }

    /// Creates a cache backed by `signer` that reads the time from `clock`.
    pub fn with_clock<S, C>(signer: S, config: &Config, clock: C) -> Self
    where
        S: UrlSigner,
        C: Clock,
    {
        let signer: Arc<dyn UrlSigner> = Arc::new(signer);
        let clock: Arc<dyn Clock> = Arc::new(clock);

        let namespace = |kind: UrlKind, policy: ExpirationPolicy| {
            let signer = Arc::clone(&signer);
            let fetch: FetchFn = Arc::new(move |key: NormalizedKey| {
                let signer = Arc::clone(&signer);
                async move { signer.sign(kind, &key).await }.boxed()
            });
            UrlNamespace::new(kind, policy, Arc::clone(&clock), fetch)
        };

        Self {
            normalizer: KeyNormalizer::new(&config.bucket),
            preview: namespace(UrlKind::Preview, config.preview.into()),
            download: namespace(UrlKind::Download, config.download.into()),
        }
    }

    /// Returns a signed preview URL for the object at `raw_key`.
    pub async fn get_preview_url(&self, raw_key: &str) -> Result<String, SignError> {
        self.get_url(UrlKind::Preview, raw_key).await
    }

    /// Returns a signed download URL for the object at `raw_key`.
    pub async fn get_download_url(&self, raw_key: &str) -> Result<String, SignError> {
        self.get_url(UrlKind::Download, raw_key).await
    }

    /// Returns a signed URL of the given `kind` for the object at `raw_key`.
    ///
    /// Keys are normalized first, so `insurance-documents/policy.pdf` and `policy.pdf` share a
    /// cache slot when the bucket is `insurance-documents`. Errors of the signer are returned
    /// unchanged.
    pub async fn get_url(&self, kind: UrlKind, raw_key: &str) -> Result<String, SignError> {
        let key = self.normalizer.normalize(raw_key);
        self.namespace(kind).get(key).await
    }

    /// Returns the namespace caching URLs of the given `kind`.
    pub fn namespace(&self, kind: UrlKind) -> &UrlNamespace {
        match kind {
            UrlKind::Preview => &self.preview,
            UrlKind::Download => &self.download,
        }
    }
}
