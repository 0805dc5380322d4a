use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::ExpirationPolicy;
use crate::error::SignError;
use crate::key::NormalizedKey;
use crate::signer::UrlKind;
use crate::utils::defer;

/// Produces a freshly signed URL for a key. Called at most once per key at a time.
///
/// The function is invoked on the spawned request task, after the namespace lock has been
/// released, so it may inspect the namespace it belongs to.
pub type FetchFn =
    Arc<dyn Fn(NormalizedKey) -> BoxFuture<'static, Result<String, SignError>> + Send + Sync>;

type PendingRequest = Shared<oneshot::Receiver<Result<String, SignError>>>;

/// A signed URL together with the time it stops being handed out.
#[derive(Clone, Debug)]
struct CacheEntry {
    url: String,
    expires_at_ms: u64,
}

impl CacheEntry {
    fn is_valid(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

#[derive(Default)]
struct NamespaceState {
    /// Signed URLs by key, possibly stale. Stale entries stay until the next fetch replaces them.
    entries: HashMap<NormalizedKey, CacheEntry>,
    /// In-flight upstream requests by key. There is at most one per key.
    pending: HashMap<NormalizedKey, PendingRequest>,
}

/// A cache of signed URLs of one [`UrlKind`].
///
/// Entries are served until `expires_in - buffer` has passed since they were signed. Validity
/// is checked against the [`Clock`] on every read, nothing expires entries in the background.
///
/// Concurrent requests for a key that is not cached share one upstream request. Its outcome,
/// success or failure, is handed to every waiter. Failures are not cached, the next request for
/// that key goes upstream again.
///
/// The upstream request runs on a spawned tokio task, so it completes and populates the cache
/// even if all waiters are dropped. Requests must therefore be made from within a tokio
/// runtime.
pub struct UrlNamespace {
    kind: UrlKind,
    policy: ExpirationPolicy,
    clock: Arc<dyn Clock>,
    fetch: FetchFn,
    /// Only ever locked for synchronous bookkeeping, never across an upstream request.
    state: Arc<Mutex<NamespaceState>>,
}

impl UrlNamespace {
    pub fn new(
        kind: UrlKind,
        policy: ExpirationPolicy,
        clock: Arc<dyn Clock>,
        fetch: FetchFn,
    ) -> Self {
        Self {
            kind,
            policy,
            clock,
            fetch,
            state: Default::default(),
        }
    }

    pub fn kind(&self) -> UrlKind {
        self.kind
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    /// Number of stored entries, including stale ones.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upstream requests currently in flight.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns a valid signed URL for `key`, signing a new one only if necessary.
    pub async fn get(&self, key: NormalizedKey) -> Result<String, SignError> {
        let kind = self.kind.as_str();

        let request = {
            let mut state = self.state.lock();

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_valid(self.clock.now_ms()) {
                    tracing::trace!(kind, %key, "signed URL cache hit");
                    metric!(counter(&format!("signed_url.{kind}.hit")) += 1);
                    return Ok(entry.url.clone());
                }
            }

            if let Some(request) = state.pending.get(&key) {
                // A concurrent request was deduplicated.
                tracing::debug!(kind, %key, "joining in-flight signing request");
                metric!(counter(&format!("signed_url.{kind}.coalesced")) += 1);
                request.clone()
            } else {
                metric!(counter(&format!("signed_url.{kind}.miss")) += 1);
                let request = self.spawn_fetch(key.clone());
                let evicted = state.pending.insert(key, request.clone());
                debug_assert!(evicted.is_none());
                request
            }
        };

        request
            .await
            .unwrap_or_else(|_cancelled| Err(SignError::Interrupted))
    }

    /// Spawns the upstream request for `key` and returns a shareable handle to its outcome.
    ///
    /// NOTE: The caller holds the state lock and is responsible for registering the returned
    /// request as pending. The fetch function only runs on the spawned task, which cannot
    /// start before that lock is released.
    fn spawn_fetch(&self, key: NormalizedKey) -> PendingRequest {
        let (sender, receiver) = oneshot::channel();

        let kind = self.kind;
        let policy = self.policy;
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let fetch = Arc::clone(&self.fetch);

        let remove_pending = {
            let state = Arc::clone(&state);
            let key = key.clone();
            defer(move || {
                state.lock().pending.remove(&key);
            })
        };

        let task = async move {
            tracing::debug!(kind = kind.as_str(), %key, "requesting signed URL");
            let start = Instant::now();
            let result = fetch(key.clone()).await;
            metric!(timer(&format!("signed_url.{kind}.fetch.duration")) = start.elapsed());

            match &result {
                Ok(url) => {
                    let expires_at_ms = policy.expires_at_ms(clock.now_ms());
                    let entry = CacheEntry {
                        url: url.clone(),
                        expires_at_ms,
                    };
                    state.lock().entries.insert(key.clone(), entry);
                    metric!(
                        counter(&format!("signed_url.{kind}.fetch")) += 1,
                        "status" => "ok",
                    );
                }
                Err(err) => {
                    tracing::debug!(
                        kind = kind.as_str(),
                        %key,
                        error = %err,
                        "failed to sign URL"
                    );
                    metric!(
                        counter(&format!("signed_url.{kind}.fetch")) += 1,
                        "status" => err.metrics_tag(),
                    );
                }
            }

            // Clear the pending slot before publishing the result. Anyone arriving in between
            // either sees the fresh entry or starts a new request, never a finished one.
            drop(remove_pending);
            sender.send(result).ok();
        };

        tokio::spawn(task);

        receiver.shared()
    }
}

impl fmt::Debug for UrlNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlNamespace")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .field("pending", &self.pending_len())
            .finish()
    }
}
