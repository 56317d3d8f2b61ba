//! Key-addressed blob storage for backups and generated reports.

use std::time::Duration;

use crate::error::StorageError;

pub mod filesystem;
pub mod presign;

pub use filesystem::FsObjectStore;
pub use presign::{SignedObject, UrlSigner};

/// Blob storage as seen by the handlers.
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Stores `bytes` under `key`, replacing any existing object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Returns the object, or `None` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// A URL granting read access to `key` for `ttl`.
    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
