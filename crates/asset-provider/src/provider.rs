//! Asset resolution across the memory, disk, and network tiers

use crate::fetch::RemoteFetcher;
use crate::transform::BlobTransform;
use bytes::Bytes;
use disk_blob_store::{CacheKey, DiskStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Per-key state in the memory tier.
enum MemoryEntry {
    /// A fetch is in flight; no second fetch may start for this key.
    Pending,
    /// The blob this key resolved to, transformed or raw.
    Resolved(Bytes),
}

/// Two-tier cache front for remote assets.
///
/// Lookup order is memory, then disk, then network. The memory map doubles
/// as the fetch-deduplication ledger: the moment a fetch is scheduled the
/// key holds a pending sentinel, so concurrent [`AssetProvider::resolve`]
/// calls for the same key observe the placeholder instead of issuing a
/// second request.
///
/// The memory tier is unbounded and lives as long as the provider: nothing
/// is evicted within a process run. Acceptable for a client screen's
/// lifetime; a long-lived service embedding this should expect the map to
/// grow with the set of distinct keys it resolves.
///
/// Cloning the provider is cheap and yields a handle to the same cache.
pub struct AssetProvider<F: RemoteFetcher> {
    inner: Arc<Inner<F>>,
}

struct Inner<F> {
    store: Arc<DiskStore>,
    fetcher: F,
    placeholder: Option<Bytes>,
    memory: Mutex<HashMap<CacheKey, MemoryEntry>>,
}

impl<F: RemoteFetcher> Clone for AssetProvider<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: RemoteFetcher> AssetProvider<F> {
    /// Create a provider with no placeholder blob.
    pub fn new(store: Arc<DiskStore>, fetcher: F) -> Self {
        Self::build(store, fetcher, None)
    }

    /// Create a provider that hands out `placeholder` while a fetch is
    /// outstanding and when a fetch fails.
    pub fn with_placeholder(store: Arc<DiskStore>, fetcher: F, placeholder: Bytes) -> Self {
        Self::build(store, fetcher, Some(placeholder))
    }

    fn build(store: Arc<DiskStore>, fetcher: F, placeholder: Option<Bytes>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                placeholder,
                memory: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The configured placeholder blob, if any.
    pub fn placeholder(&self) -> Option<&Bytes> {
        self.inner.placeholder.as_ref()
    }

    /// Number of keys currently held in the memory tier.
    pub async fn memory_len(&self) -> usize {
        self.inner.memory.lock().await.len()
    }

    /// Resolve `url` to a blob, returning whatever is immediately available.
    ///
    /// Memory and disk hits come back synchronously and `completion` is
    /// dropped unfired — the returned value is the answer. While a fetch
    /// for the key is already in flight, the configured placeholder (or
    /// `None`) comes back instead, again without firing `completion`.
    ///
    /// On a full miss this returns `None`, schedules one network fetch,
    /// and later invokes `completion` exactly once with the fetched blob,
    /// or with the placeholder if the fetch failed and one is configured.
    /// Completion runs on an arbitrary tokio worker, never the calling
    /// task; callers that need a specific context re-dispatch themselves.
    ///
    /// Failed fetches are never cached: the key returns to the unknown
    /// state so a later call retries. A scheduled fetch always runs to
    /// completion; there is no cancellation.
    pub async fn resolve<C>(
        &self,
        url: &Url,
        transform: Option<Arc<dyn BlobTransform>>,
        completion: C,
    ) -> Option<Bytes>
    where
        C: FnOnce(Bytes) + Send + 'static,
    {
        let key = cache_key(url, transform.as_deref());

        let mut memory = self.inner.memory.lock().await;
        match memory.get(&key) {
            Some(MemoryEntry::Resolved(bytes)) => return Some(bytes.clone()),
            Some(MemoryEntry::Pending) => return self.inner.placeholder.clone(),
            None => {}
        }

        // The disk probe stays under the memory lock: the miss check and
        // the pending insert must be indivisible per key, or two callers
        // could both schedule a fetch. Network IO runs off the lock.
        if let Some(bytes) = self.inner.store.read(&key).await {
            let bytes = Bytes::from(bytes);
            memory.insert(key, MemoryEntry::Resolved(bytes.clone()));
            return Some(bytes);
        }

        memory.insert(key.clone(), MemoryEntry::Pending);
        drop(memory);

        debug!(key = %key, url = %url, "scheduling fetch");
        let inner = Arc::clone(&self.inner);
        let url = url.clone();
        tokio::spawn(async move {
            inner.finish_fetch(key, url, transform, completion).await;
        });

        None
    }
}

impl<F: RemoteFetcher> Inner<F> {
    /// Runs on its own task: perform the network fetch and settle the key.
    async fn finish_fetch<C>(
        self: Arc<Self>,
        key: CacheKey,
        url: Url,
        transform: Option<Arc<dyn BlobTransform>>,
        completion: C,
    ) where
        C: FnOnce(Bytes) + Send + 'static,
    {
        let raw = match self.fetcher.fetch(url.clone()).await {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => {
                warn!(key = %key, url = %url, "fetch returned an empty payload");
                self.settle_failure(&key, completion).await;
                return;
            }
            Err(e) => {
                warn!(key = %key, url = %url, error = %e, "fetch failed");
                self.settle_failure(&key, completion).await;
                return;
            }
        };

        let blob = match &transform {
            Some(t) => match t.apply(&raw) {
                Some(rendered) => {
                    debug!(key = %key, transform = t.name(), "transform applied");
                    rendered
                }
                None => {
                    debug!(key = %key, transform = t.name(), "transform declined, keeping raw bytes");
                    raw
                }
            },
            None => raw,
        };

        // Write-through failures degrade to a memory-only entry.
        if let Err(e) = self.store.write(&key, &blob).await {
            warn!(key = %key, error = %e, "write-through to disk failed");
        }

        self.memory
            .lock()
            .await
            .insert(key, MemoryEntry::Resolved(blob.clone()));
        completion(blob);
    }

    /// Failed fetches are never cached: drop the pending sentinel so the
    /// next resolve for this key fetches again, then deliver the
    /// placeholder if one is configured.
    async fn settle_failure<C>(&self, key: &CacheKey, completion: C)
    where
        C: FnOnce(Bytes) + Send + 'static,
    {
        self.memory.lock().await.remove(key);
        if let Some(placeholder) = self.placeholder.clone() {
            completion(placeholder);
        }
    }
}

/// Cache key for `url` as seen through `transform`.
///
/// A transform with a key suffix claims its own slot; without one it
/// shares the raw URL's slot.
fn cache_key(url: &Url, transform: Option<&dyn BlobTransform>) -> CacheKey {
    match transform.and_then(|t| t.key_suffix(url)) {
        Some(suffix) => CacheKey::new(format!("{}/{}", url, suffix)),
        None => CacheKey::new(url.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use disk_blob_store::CacheBudget;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::{oneshot, Notify};

    /// Scripted transport: counts fetch attempts, optionally waits for a
    /// release signal, then yields a fixed payload or a 500.
    struct StubFetcher {
        payload: Bytes,
        fail: bool,
        calls: Arc<AtomicUsize>,
        release: Option<Arc<Notify>>,
    }

    impl StubFetcher {
        fn ok(payload: &'static [u8], calls: Arc<AtomicUsize>) -> Self {
            Self {
                payload: Bytes::from_static(payload),
                fail: false,
                calls,
                release: None,
            }
        }

        fn failing(calls: Arc<AtomicUsize>) -> Self {
            Self {
                payload: Bytes::new(),
                fail: true,
                calls,
                release: None,
            }
        }

        fn gated(payload: &'static [u8], calls: Arc<AtomicUsize>, release: Arc<Notify>) -> Self {
            Self {
                payload: Bytes::from_static(payload),
                fail: false,
                calls,
                release: Some(release),
            }
        }
    }

    impl RemoteFetcher for StubFetcher {
        fn fetch(&self, _url: Url) -> impl Future<Output = crate::error::Result<Bytes>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let payload = self.payload.clone();
            let fail = self.fail;
            let release = self.release.clone();
            async move {
                if let Some(release) = release {
                    release.notified().await;
                }
                if fail {
                    Err(FetchError::Status(500))
                } else {
                    Ok(payload)
                }
            }
        }
    }

    struct SuffixTransform {
        suffix: Option<&'static str>,
        output: Option<&'static [u8]>,
    }

    impl BlobTransform for SuffixTransform {
        fn name(&self) -> &str {
            self.suffix.unwrap_or("anonymous")
        }

        fn key_suffix(&self, _url: &Url) -> Option<String> {
            self.suffix.map(str::to_string)
        }

        fn apply(&self, _blob: &[u8]) -> Option<Bytes> {
            self.output.map(Bytes::from_static)
        }
    }

    async fn test_store() -> (tempfile::TempDir, Arc<DiskStore>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::new(
            dir.path().join("assets"),
            CacheBudget::default(),
        ));
        store.init().await.unwrap();
        (dir, store)
    }

    fn asset_url() -> Url {
        Url::parse("https://img.example/products/44.png").unwrap()
    }

    #[tokio::test]
    async fn test_full_miss_fetches_and_completes() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::new(store.clone(), StubFetcher::ok(b"blob", calls.clone()));
        let url = asset_url();

        let (tx, rx) = oneshot::channel();
        let immediate = provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(immediate, None);
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"blob"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Written through to disk under the raw URL's key.
        let key = CacheKey::new(url.as_str());
        assert_eq!(store.read(&key).await, Some(b"blob".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_hit_skips_fetch_and_completion() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::new(store, StubFetcher::ok(b"blob", calls.clone()));
        let url = asset_url();

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;
        rx.await.unwrap();

        let (tx, rx) = oneshot::channel::<Bytes>();
        let hit = provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(hit, Some(Bytes::from_static(b"blob")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The synchronous return was the answer; the callback was dropped.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_disk_hit_returns_synchronously() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let url = asset_url();

        store
            .write(&CacheKey::new(url.as_str()), b"persisted")
            .await
            .unwrap();

        let provider = AssetProvider::new(store, StubFetcher::ok(b"net", calls.clone()));
        let (tx, rx) = oneshot::channel::<Bytes>();
        let hit = provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(hit, Some(Bytes::from_static(b"persisted")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(rx.await.is_err());
        assert_eq!(provider.memory_len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let provider = AssetProvider::with_placeholder(
            store,
            StubFetcher::gated(b"blob", calls.clone(), release.clone()),
            Bytes::from_static(b"placeholder"),
        );
        let url = asset_url();

        let (tx, rx) = oneshot::channel();
        let first = provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;
        assert_eq!(first, None);

        // While the fetch is parked, every further resolve observes the
        // placeholder and schedules nothing.
        for _ in 0..5 {
            let repeat = provider.resolve(&url, None, |_| {}).await;
            assert_eq!(repeat, Some(Bytes::from_static(b"placeholder")));
        }

        release.notify_one();
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"blob"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Everyone now sees the same resolved bytes.
        let settled = provider.resolve(&url, None, |_| {}).await;
        assert_eq!(settled, Some(Bytes::from_static(b"blob")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_delivers_placeholder_then_retries() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::with_placeholder(
            store.clone(),
            StubFetcher::failing(calls.clone()),
            Bytes::from_static(b"placeholder"),
        );
        let url = asset_url();

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"placeholder"));
        // Nothing cached anywhere: the failure left no trace.
        assert_eq!(provider.memory_len().await, 0);
        assert_eq!(store.read(&CacheKey::new(url.as_str())).await, None);

        // The next resolve for the same key fetches again.
        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"placeholder"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_without_placeholder_never_completes() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::new(store, StubFetcher::failing(calls.clone()));
        let url = asset_url();

        let (tx, rx) = oneshot::channel::<Bytes>();
        let immediate = provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(immediate, None);
        // The callback was dropped without firing.
        assert!(rx.await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transform_occupies_its_own_slot() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::new(store.clone(), StubFetcher::ok(b"raw", calls.clone()));
        let url = asset_url();
        let transform: Arc<dyn BlobTransform> = Arc::new(SuffixTransform {
            suffix: Some("round-44"),
            output: Some(b"rendered"),
        });

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, Some(transform), move |blob| {
                let _ = tx.send(blob);
            })
            .await;
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"rendered"));

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"raw"));

        // Two fetches, two independent disk entries.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let rendered_key = CacheKey::new(format!("{}/round-44", url));
        assert_eq!(store.read(&rendered_key).await, Some(b"rendered".to_vec()));
        assert_eq!(
            store.read(&CacheKey::new(url.as_str())).await,
            Some(b"raw".to_vec())
        );
    }

    #[tokio::test]
    async fn test_transform_decline_stores_raw_bytes() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::new(store.clone(), StubFetcher::ok(b"raw", calls.clone()));
        let url = asset_url();
        let transform: Arc<dyn BlobTransform> = Arc::new(SuffixTransform {
            suffix: Some("thumbnail-200x200"),
            output: None,
        });

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, Some(transform), move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"raw"));
        let key = CacheKey::new(format!("{}/thumbnail-200x200", url));
        assert_eq!(store.read(&key).await, Some(b"raw".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_payload_is_a_failure() {
        let (_dir, store) = test_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = AssetProvider::with_placeholder(
            store.clone(),
            StubFetcher::ok(b"", calls.clone()),
            Bytes::from_static(b"placeholder"),
        );
        let url = asset_url();

        let (tx, rx) = oneshot::channel();
        provider
            .resolve(&url, None, move |blob| {
                let _ = tx.send(blob);
            })
            .await;

        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"placeholder"));
        assert_eq!(store.read(&CacheKey::new(url.as_str())).await, None);
        assert_eq!(provider.memory_len().await, 0);
    }

    #[test]
    fn test_cache_key_with_and_without_transform_differ() {
        let url = Url::parse("https://img.example/products/44.png").unwrap();
        let transform = SuffixTransform {
            suffix: Some("round-44"),
            output: None,
        };

        let raw = cache_key(&url, None);
        let rendered = cache_key(&url, Some(&transform));
        assert_ne!(raw, rendered);
        assert_eq!(raw.as_str(), "https://img.example/products/44.png");
        assert_eq!(
            rendered.as_str(),
            "https://img.example/products/44.png/round-44"
        );
    }

    #[test]
    fn test_anonymous_transform_shares_raw_slot() {
        let url = Url::parse("https://img.example/products/44.png").unwrap();
        let transform = SuffixTransform {
            suffix: None,
            output: Some(b"rendered"),
        };

        assert_eq!(cache_key(&url, Some(&transform)), cache_key(&url, None));
    }
}
