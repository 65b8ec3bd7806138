//! src/services/object_store.rs
//!
//! The object store contract and `LocalObjectStore`, which keeps payloads on
//! local disk sharded beneath `base_path/{shard}/{shard}/{key}` and indexes
//! them in the SQLite `objects` table. Read-only access can be delegated with
//! HMAC-signed URLs that the `/blobs` route verifies.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream::BoxStream};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a signed URL when the caller does not pick one.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

const MAX_OBJECT_KEY_LEN: usize = 1024;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("signed url ttl out of range")]
    InvalidTtl,
    #[error("signature does not match")]
    InvalidSignature,
    #[error("signed url expired")]
    Expired,
    #[error("signing key rejected")]
    SigningKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Index entry for one stored payload.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// MD5 of the payload, lowercase hex.
    pub etag: String,
    pub created_at: DateTime<Utc>,
}

/// A time-boxed, read-only link to one object.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Key-addressed binary storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<StoredObject>;

    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream>;

    /// Returns whether anything was removed. Absent keys are not an error.
    async fn delete(&self, key: &str) -> ObjectStoreResult<bool>;

    async fn list(&self) -> ObjectStoreResult<Vec<StoredObject>>;

    /// Read-only URL valid until `now + ttl` (one hour when `ttl` is `None`).
    fn signed_url(&self, key: &str, ttl: Option<Duration>) -> ObjectStoreResult<SignedUrl>;

    async fn ping(&self) -> ObjectStoreResult<()>;
}

/// Build a fresh key for an upload: a random UUID prefix followed by the
/// file name, so reusing a file name never overwrites an earlier upload.
///
/// The file name is reduced to URL- and path-safe characters.
pub fn new_object_key(file_name: &str) -> String {
    let mut safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while safe.contains("..") {
        safe = safe.replace("..", "._");
    }
    if safe.is_empty() {
        safe.push_str("file");
    }
    format!("{}_{}", Uuid::new_v4(), safe)
}

/// Rejects keys that could escape the storage root or break URLs.
fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    Ok(())
}

/// Object store on local disk with a SQLite index.
#[derive(Clone)]
pub struct LocalObjectStore {
    db: Arc<SqlitePool>,
    base_path: PathBuf,
    public_base_url: String,
    signing_key: Arc<[u8]>,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_key: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_key: Arc::from(signing_key.as_ref()),
        }
    }

    /// Two-level shard directories from MD5(key), 00–ff each.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, key: &str) -> ObjectStoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT key, content_type, size_bytes, etag, created_at FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    /// Open a payload for streaming along with its index entry.
    pub async fn open(&self, key: &str) -> ObjectStoreResult<(StoredObject, File)> {
        ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        Ok((object, file))
    }

    fn mac(&self, key: &str, expires: i64) -> ObjectStoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| ObjectStoreError::SigningKey)?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, key: &str, expires: i64) -> ObjectStoreResult<String> {
        let mac = self.mac(key, expires)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Check a signature produced by `signed_url`.
    pub fn verify_signed(&self, key: &str, expires: i64, signature: &str) -> ObjectStoreResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ObjectStoreError::InvalidSignature)?;
        self.mac(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| ObjectStoreError::InvalidSignature)?;

        if Utc::now().timestamp() > expires {
            return Err(ObjectStoreError::Expired);
        }
        Ok(())
    }

    /// Remove empty shard directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Writes to a temp file, fsyncs, renames into place, then indexes the
    /// payload. The file is removed again if indexing fails.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<StoredObject> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        let object = StoredObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as i64,
            etag: format!("{:x}", md5::compute(&bytes)),
            created_at: Utc::now(),
        };

        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (key, content_type, size_bytes, etag, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                created_at = excluded.created_at
            "#,
        )
        .bind(&object.key)
        .bind(&object.content_type)
        .bind(object.size_bytes)
        .bind(&object.etag)
        .bind(object.created_at)
        .execute(&*self.db)
        .await;

        match insert_result {
            Ok(_) => {
                debug!(key, size = object.size_bytes, "stored object");
                Ok(object)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(ObjectStoreError::Sqlx(err))
            }
        }
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        let (_, file) = self.open(key).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<bool> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let file_removed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        };

        let result = sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(file_removed || result.rows_affected() > 0)
    }

    async fn list(&self) -> ObjectStoreResult<Vec<StoredObject>> {
        let objects = sqlx::query_as::<_, StoredObject>(
            "SELECT key, content_type, size_bytes, etag, created_at FROM objects ORDER BY key",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(objects)
    }

    fn signed_url(&self, key: &str, ttl: Option<Duration>) -> ObjectStoreResult<SignedUrl> {
        ensure_key_safe(key)?;
        let ttl = TimeDelta::from_std(ttl.unwrap_or(DEFAULT_SIGNED_URL_TTL))
            .map_err(|_| ObjectStoreError::InvalidTtl)?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or(ObjectStoreError::InvalidTtl)?;
        let expires = expires_at.timestamp();

        Ok(SignedUrl {
            url: format!(
                "{}/blobs/{}?expires={}&signature={}",
                self.public_base_url,
                urlencoding::encode(key),
                expires,
                self.signature(key, expires)?
            ),
            expires_at,
        })
    }

    /// Checks the index database and a write/read/delete round trip on disk.
    async fn ping(&self) -> ObjectStoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(ObjectStoreError::Io(io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::memory_pool;
    use futures::TryStreamExt;

    async fn store(dir: &tempfile::TempDir) -> LocalObjectStore {
        LocalObjectStore::new(
            memory_pool().await,
            dir.path(),
            "http://localhost:3000/",
            b"test-secret",
        )
    }

    async fn read_all(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[test]
    fn new_keys_are_unique_and_path_safe() {
        let a = new_object_key("report final.pdf");
        let b = new_object_key("report final.pdf");
        assert_ne!(a, b);
        assert!(a.ends_with("_report_final.pdf"));

        let sneaky = new_object_key("../../etc/passwd");
        assert!(ensure_key_safe(&sneaky).is_ok());
        assert!(!sneaky.contains('/'));

        assert!(new_object_key("").ends_with("_file"));
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/abs").is_err());
        assert!(ensure_key_safe("a/../b").is_err());
        assert!(ensure_key_safe("a\\b").is_err());
        assert!(ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
        assert!(ensure_key_safe("abc_file.txt").is_ok());
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let stored = store
            .put("k1_hello.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"hello")));

        let body = read_all(store.get("k1_hello.txt").await.unwrap()).await;
        assert_eq!(body, b"hello");
        assert_eq!(store.list().await.unwrap(), vec![stored]);

        assert!(store.delete("k1_hello.txt").await.unwrap());
        assert!(matches!(
            store.get("k1_hello.txt").await,
            Err(ObjectStoreError::NotFound(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(!store.delete("never_written.bin").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prunes_shard_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store
            .put("k_a.bin", Bytes::from_static(b"a"), "application/octet-stream")
            .await
            .unwrap();
        store.delete("k_a.bin").await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn signed_urls_verify_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let signed = store
            .signed_url("k1_a b.txt", Some(Duration::from_secs(60)))
            .unwrap();
        assert!(
            signed
                .url
                .starts_with("http://localhost:3000/blobs/k1_a%20b.txt?expires=")
        );

        let expires = signed.expires_at.timestamp();
        let signature = signed.url.rsplit("signature=").next().unwrap();
        store.verify_signed("k1_a b.txt", expires, signature).unwrap();

        assert!(matches!(
            store.verify_signed("other_key", expires, signature),
            Err(ObjectStoreError::InvalidSignature)
        ));
        assert!(matches!(
            store.verify_signed("k1_a b.txt", expires + 1, signature),
            Err(ObjectStoreError::InvalidSignature)
        ));

        let past = Utc::now().timestamp() - 10;
        let stale = store.signature("k1_a b.txt", past).unwrap();
        assert!(matches!(
            store.verify_signed("k1_a b.txt", past, &stale),
            Err(ObjectStoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn signed_url_escapes_reserved_characters_in_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let signed = store.signed_url("k2_a&b=c#ü.txt", None).unwrap();
        assert!(
            signed
                .url
                .starts_with("http://localhost:3000/blobs/k2_a%26b%3Dc%23%C3%BC.txt?expires=")
        );
        assert_eq!(signed.url.matches('?').count(), 1);
    }

    #[tokio::test]
    async fn default_ttl_is_one_hour() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let before = Utc::now();
        let signed = store.signed_url("k_x", None).unwrap();
        let lifetime = signed.expires_at - before;
        assert!(lifetime <= TimeDelta::seconds(3601));
        assert!(lifetime >= TimeDelta::seconds(3599));
    }

    #[tokio::test]
    async fn ping_checks_disk_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.ping().await.unwrap();
    }
}
