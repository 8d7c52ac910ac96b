//! Object-storage seam.
//!
//! The mirror engine only ever talks to a bucket through [`ObjectStore`], so
//! the download pipeline can be exercised against the in-memory store in
//! tests and against S3 (or any S3-compatible endpoint) in production.

pub mod error;
#[cfg(test)]
pub(crate) mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

pub use error::StoreError;
pub use s3::S3Store;

/// Path-like identifier of a remote object, unique within its bucket.
pub type ObjectKey = String;

/// Streamed object body. Chunk boundaries are whatever the client delivers.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// Metadata returned by a `HeadObject`-style lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<ObjectKey>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_token: Option<String>,
}

/// Read-only access to a single bucket.
///
/// Object-safe so the engine can hold an `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of keys under `prefix`, continuing from `continuation`.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Fetch size and modification time for `key`.
    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError>;

    /// Open a streamed download of `key`.
    async fn get(&self, key: &str) -> Result<ObjectStream, StoreError>;

    /// Human-readable location, used in log lines.
    fn describe(&self) -> String;
}
