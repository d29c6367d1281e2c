//! Two-tier remote asset cache
//!
//! Resolves a source URL, plus an optional named transform, to a binary
//! blob. Lookup falls through memory, then the disk store, then the
//! network; concurrent requests for one cache key share a single fetch,
//! and fetched blobs are written through to disk so they survive process
//! restarts.
//!
//! # Example
//!
//! ```no_run
//! use asset_provider::{AssetProvider, HttpFetcher};
//! use disk_blob_store::{CacheBudget, DiskStore};
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn example() -> Result<(), disk_blob_store::StoreError> {
//! let store = Arc::new(DiskStore::new("./cache/assets", CacheBudget::default()));
//! store.init().await?;
//!
//! let provider = AssetProvider::new(store, HttpFetcher::new());
//! let url = Url::parse("https://img.example/products/44.png").unwrap();
//!
//! // Cached data comes back synchronously; on a miss the blob arrives
//! // through the completion callback once the fetch lands.
//! let cached = provider
//!     .resolve(&url, None, |blob| {
//!         println!("fetched {} bytes", blob.len());
//!     })
//!     .await;
//! if let Some(blob) = cached {
//!     println!("already cached: {} bytes", blob.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
mod provider;
mod transform;

pub use error::{FetchError, Result};
pub use fetch::{HttpFetcher, RemoteFetcher};
pub use provider::AssetProvider;
pub use transform::BlobTransform;
