//! Time-limited read URLs signed with HMAC-SHA256.
//!
//! URL shape: `{public_url}/{bucket}/{key}?expires={unix}&signature={sig}`
//! where `sig` is the URL-safe base64 MAC of `"{bucket}/{key}\n{expires}"`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// Object named by a URL that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject {
    pub bucket: String,
    pub key: String,
    pub expires_at: i64,
}

pub struct UrlSigner {
    key: SecretString,
    public_url: String,
}

impl UrlSigner {
    pub fn new(key: SecretString, public_url: &str) -> Self {
        Self {
            key,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        mac.update(format!("{}/{}\n{}", bucket, key, expires).as_bytes());
        Ok(mac)
    }

    /// Builds a URL for `bucket/key` that stops verifying at `expires_at`.
    pub fn presign(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let expires = expires_at.timestamp();
        let signature = URL_SAFE_NO_PAD.encode(self.mac(bucket, key, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.public_url, bucket, key, expires, signature
        ))
    }

    /// Checks a URL produced by [`UrlSigner::presign`] at time `now`.
    pub fn verify(&self, url: &str, now: DateTime<Utc>) -> Result<SignedObject, StorageError> {
        let invalid = |reason: &str| StorageError::Signing(format!("{}: {}", reason, url));

        let rest = url
            .strip_prefix(&self.public_url)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| invalid("foreign URL"))?;
        let (path, query) = rest.split_once('?').ok_or_else(|| invalid("missing query"))?;
        let (bucket, key) = path.split_once('/').ok_or_else(|| invalid("missing key"))?;

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = URL_SAFE_NO_PAD.decode(v).ok(),
                _ => {}
            }
        }
        let expires = expires.ok_or_else(|| invalid("missing expiry"))?;
        let signature = signature.ok_or_else(|| invalid("missing signature"))?;

        self.mac(bucket, key, expires)?
            .verify_slice(&signature)
            .map_err(|_| invalid("bad signature"))?;

        if now.timestamp() > expires {
            return Err(invalid("expired"));
        }

        Ok(SignedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires_at: expires,
        })
    }
}
