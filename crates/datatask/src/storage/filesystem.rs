use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::presign::{SignedObject, UrlSigner};
use super::ObjectStore;
use crate::config::StorageConfig;
use crate::error::{ConfigError, StorageError};

/// Object store laid out as `<root>/<bucket>/<key>` on the local filesystem.
pub struct FsObjectStore {
    bucket_dir: PathBuf,
    bucket: String,
    signer: Option<UrlSigner>,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, bucket: &str) -> Result<Self, StorageError> {
        if bucket.contains('/') {
            return Err(StorageError::InvalidKey(bucket.to_string()));
        }
        validate_key(bucket)?;
        let bucket_dir = root.as_ref().join(bucket);
        ensure_directory(&bucket_dir)?;
        Ok(Self {
            bucket_dir,
            bucket: bucket.to_string(),
            signer: None,
        })
    }

    /// Opens the store described by `config`, with URL signing when a
    /// signing key is configured.
    pub fn from_config(config: &StorageConfig) -> Result<Self, ConfigError> {
        let store = Self::new(config.resolved_root(), &config.bucket)
            .map_err(|e| ConfigError::Validation {
                message: format!("storage: {}", e),
            })?;
        Ok(match config.signing_key()? {
            Some(key) => store.with_signer(UrlSigner::new(key, &config.public_url)),
            None => {
                log::warn!("No signing key configured; report URLs are unavailable");
                store
            }
        })
    }

    /// Enables presigned URLs.
    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.bucket_dir.join(key))
    }

    /// Checks a URL issued by this store and returns the object it names.
    pub fn verify_presigned_url(&self, url: &str) -> Result<SignedObject, StorageError> {
        let signer = self.signer()?;
        let object = signer.verify(url, Utc::now())?;
        if object.bucket != self.bucket {
            return Err(StorageError::Signing(format!(
                "URL is for bucket '{}', not '{}'",
                object.bucket, self.bucket
            )));
        }
        Ok(object)
    }

    fn signer(&self) -> Result<&UrlSigner, StorageError> {
        self.signer
            .as_ref()
            .ok_or_else(|| StorageError::Signing("no signing key configured".to_string()))
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

/// Keys are relative, `/`-separated, and never escape the bucket.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || !key.chars().all(is_key_char)
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Writes to a temp file next to the target and renames it into place,
    /// so readers see either the old object or the new one.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        ensure_directory(dir)?;

        let tmp = dir.join(format!(".upload-{}", uuid::Uuid::new_v4()));
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(StorageError::WriteFile { path: tmp, source: e });
        }

        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StorageError::WriteFile {
                path: path.clone(),
                source: e,
            }
        })?;

        log::debug!("Stored {} bytes at {}/{}", bytes.len(), self.bucket, key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.object_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StorageError::Signing(format!("invalid expiry: {}", e)))?;
        self.signer()?.presign(&self.bucket, key, Utc::now() + ttl)
    }
}
