//! The contract with the upstream URL signing service.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::SignError;
use crate::key::NormalizedKey;

/// The kind of signed URL, each backed by its own cache namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UrlKind {
    /// A URL for rendering the object inline.
    Preview,
    /// A URL that makes browsers save the object as attachment.
    Download,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for UrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates signed URLs for objects in storage.
///
/// This is the only place where the cache talks to the outside world. Every call is assumed to
/// be expensive (billed or rate limited), which is what the cache exists to avoid.
#[async_trait::async_trait]
pub trait UrlSigner: Send + Sync + 'static {
    /// Returns a signed preview URL for `key`.
    async fn preview(&self, key: &NormalizedKey) -> Result<String, SignError>;

    /// Returns a signed download URL for `key`.
    async fn download(&self, key: &NormalizedKey) -> Result<String, SignError>;

    /// Returns a signed URL of the given `kind`.
    async fn sign(&self, kind: UrlKind, key: &NormalizedKey) -> Result<String, SignError> {
        match kind {
            UrlKind::Preview => self.preview(key).await,
            UrlKind::Download => self.download(key).await,
        }
    }
}

type SignFn =
    Box<dyn Fn(NormalizedKey) -> BoxFuture<'static, Result<String, SignError>> + Send + Sync>;

/// A [`UrlSigner`] made from a pair of async functions.
pub struct FnSigner {
    preview: SignFn,
    download: SignFn,
}

impl FnSigner {
    pub fn new<P, PF, D, DF>(preview: P, download: D) -> Self
    where
        P: Fn(NormalizedKey) -> PF + Send + Sync + 'static,
        PF: Future<Output = Result<String, SignError>> + Send + 'static,
        D: Fn(NormalizedKey) -> DF + Send + Sync + 'static,
        DF: Future<Output = Result<String, SignError>> + Send + 'static,
    {
        Self {
            preview: Box::new(move |key| preview(key).boxed()),
            download: Box::new(move |key| download(key).boxed()),
        }
    }
}

impl fmt::Debug for FnSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSigner").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl UrlSigner for FnSigner {
    async fn preview(&self, key: &NormalizedKey) -> Result<String, SignError> {
        (self.preview)(key.clone()).await
    }

    async fn download(&self, key: &NormalizedKey) -> Result<String, SignError> {
        (self.download)(key.clone()).await
    }
}
