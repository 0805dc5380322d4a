//! A cache for short-lived signed URLs of stored documents.
//!
//! [`SignedUrlCache`] hands out preview and download URLs for objects in a storage bucket.
//! Fresh URLs are requested from a [`UrlSigner`] only when no valid one is cached, and
//! concurrent requests for the same object share a single upstream request.

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod namespace;
pub mod signer;
pub mod storage;
pub mod utils;

pub use cache::SignedUrlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ExpirationPolicy};
pub use error::SignError;
pub use key::{KeyNormalizer, NormalizedKey};
pub use namespace::UrlNamespace;
pub use signer::{FnSigner, UrlKind, UrlSigner};
pub use storage::StorageSigner;
