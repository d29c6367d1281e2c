//! Post-fetch blob transformation

use bytes::Bytes;
use url::Url;

/// A named rendition applied to fetched blobs before they are cached.
///
/// Transforms are pure functions over the raw bytes; the provider never
/// looks inside a blob itself. Each transform claims its own cache slot
/// via [`BlobTransform::key_suffix`], so the same source fetched with two
/// different transforms is cached, and later evicted, independently.
pub trait BlobTransform: Send + Sync {
    /// Stable name used in logs and diagnostics, e.g. `"round-44"`.
    fn name(&self) -> &str;

    /// Suffix distinguishing this rendition's cache slot from the raw
    /// URL's. Returning `None` means the rendition shares the raw slot.
    fn key_suffix(&self, url: &Url) -> Option<String>;

    /// Produce the rendition, or `None` to decline and let the raw bytes
    /// be cached unchanged.
    fn apply(&self, blob: &[u8]) -> Option<Bytes>;
}
