//! Object storage for compressed outputs.
//!
//! [`ObjectStore`] is the port the CLI persists results through.
//! [`LocalObjectStore`] keeps objects under a directory and hands out
//! `file://` URLs signed with HMAC-SHA256 that expire after a TTL.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::config::StorageConfig;
use fp_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Where compressed outputs and thumbnails are persisted.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn file_exists(&self, key: &str) -> Result<bool>;

    /// A URL granting read access to `key` for `ttl_secs` seconds.
    async fn get_signed_url(&self, key: &str, ttl_secs: u64) -> Result<String>;
}

/// Check that `key` is a relative, slash-separated path that stays inside
/// the store.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("storage key is empty".into()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(Error::Validation(format!(
            "storage key '{key}' must be a relative path"
        )));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::Validation(format!(
                "storage key '{key}' contains an invalid segment"
            )));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::Validation(format!(
                "storage key '{key}' contains unsupported character {c:?}"
            )));
        }
    }
    Ok(())
}

/// Replace every character [`validate_key`] would reject with `_`.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Generate a random signing secret (64 hex characters).
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Directory-backed [`ObjectStore`].
pub struct LocalObjectStore {
    root: PathBuf,
    secret: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            secret: secret.into(),
        }
    }

    /// Build a store from configuration. Without a configured secret a
    /// random one is generated, so URLs only verify within this process.
    pub fn from_config(config: &StorageConfig) -> Self {
        let secret = match &config.signing_secret {
            Some(secret) => secret.clone(),
            None => {
                tracing::debug!("No storage signing_secret configured; generating one");
                generate_secret()
            }
        };
        Self::new(&config.root, secret)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn sign(&self, key: &str, expires: u64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid signing key: {e}")))?;
        mac.update(format!("{key}\n{expires}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signed URL for `key` that expires at the unix time `expires`.
    pub fn signed_url_at(&self, key: &str, expires: u64) -> Result<String> {
        let path = self.path_for(key)?;
        let signature = self.sign(key, expires)?;
        Ok(format!(
            "file://{}?expires={expires}&signature={signature}",
            path.display()
        ))
    }

    /// Check a URL produced by [`ObjectStore::get_signed_url`] and return
    /// the key it grants access to.
    pub fn verify_signed_url(&self, url: &str) -> Result<String> {
        self.verify_signed_url_at(url, unix_now())
    }

    /// [`Self::verify_signed_url`] against an explicit unix time.
    pub fn verify_signed_url_at(&self, url: &str, now: u64) -> Result<String> {
        let invalid = |why: &str| Error::Validation(format!("invalid signed URL: {why}"));

        let rest = url
            .strip_prefix("file://")
            .ok_or_else(|| invalid("not a file:// URL"))?;
        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| invalid("missing query"))?;

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<u64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let expires = expires.ok_or_else(|| invalid("missing or malformed expires"))?;
        let signature = signature.ok_or_else(|| invalid("missing signature"))?;

        let key = Path::new(path)
            .strip_prefix(&self.root)
            .map_err(|_| invalid("path is outside the store"))?
            .to_str()
            .ok_or_else(|| invalid("path is not UTF-8"))?
            .to_string();
        validate_key(&key)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid signing key: {e}")))?;
        mac.update(format!("{key}\n{expires}").as_bytes());
        let expected = hex::decode(signature).map_err(|_| invalid("signature is not hex"))?;
        mac.verify_slice(&expected)
            .map_err(|_| invalid("signature mismatch"))?;

        if now > expires {
            return Err(invalid("expired"));
        }
        Ok(key)
    }
}

impl std::fmt::Debug for LocalObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObjectStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so readers never see a partial object.
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &path).await?;
        tracing::debug!(key, bytes = data.len(), "object stored");
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_signed_url(&self, key: &str, ttl_secs: u64) -> Result<String> {
        self.signed_url_at(key, unix_now().saturating_add(ttl_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store(dir: &tempfile::TempDir) -> LocalObjectStore {
        LocalObjectStore::new(dir.path(), "test-secret")
    }

    #[test]
    fn keys_must_stay_inside_the_store() {
        assert!(validate_key("job/clip_balanced_native.webm").is_ok());
        for bad in ["", "/etc/passwd", "a/../b", "..", "a//b", "./a", "a\\b", "a b"] {
            assert_matches!(validate_key(bad), Err(Error::Validation(_)), "{bad:?}");
        }
    }

    #[test]
    fn sanitize_produces_valid_segments() {
        assert_eq!(sanitize_segment("my clip (1).mp4"), "my_clip__1_.mp4");
        assert_eq!(sanitize_segment(".."), "_");
        assert!(validate_key(&sanitize_segment("über/clip")).is_ok());
    }

    #[test]
    fn generated_secrets_are_random_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn put_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(!store.file_exists("job/out.webm").await.unwrap());
        store
            .put("job/out.webm", Bytes::from_static(b"webm"))
            .await
            .unwrap();
        assert!(store.file_exists("job/out.webm").await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join("job/out.webm")).unwrap(),
            b"webm"
        );
        assert!(!dir.path().join("job/out.partial").exists());
    }

    #[tokio::test]
    async fn put_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(&dir)
            .put("../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[tokio::test]
    async fn signed_url_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let url = store.get_signed_url("job/out.mp4", 60).await.unwrap();

        assert!(url.starts_with("file://"));
        assert!(url.contains("signature="));
        assert_eq!(store.verify_signed_url(&url).unwrap(), "job/out.mp4");
    }

    #[test]
    fn expired_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let url = store.signed_url_at("out.mp4", 1_000).unwrap();

        assert!(store.verify_signed_url_at(&url, 1_000).is_ok());
        let err = store.verify_signed_url_at(&url, 1_001).unwrap_err();
        assert_matches!(err, Error::Validation(ref msg) if msg.contains("expired"));
    }

    #[test]
    fn tampered_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let url = store.signed_url_at("out.mp4", 5_000).unwrap();

        let longer = url.replace("expires=5000", "expires=9000");
        assert_matches!(
            store.verify_signed_url_at(&longer, 0),
            Err(Error::Validation(ref msg)) if msg.contains("mismatch")
        );

        let other_key = url.replace("out.mp4", "secret.mp4");
        assert!(store.verify_signed_url_at(&other_key, 0).is_err());

        let other_store = LocalObjectStore::new(dir.path(), "another-secret");
        assert!(other_store.verify_signed_url_at(&url, 0).is_err());
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for url in [
            "https://example.com/out.mp4?expires=1&signature=00",
            "file:///tmp/out.mp4",
            "file:///elsewhere/out.mp4?expires=1&signature=00",
        ] {
            assert_matches!(store.verify_signed_url_at(url, 0), Err(Error::Validation(_)));
        }
    }
}
