// src/sys/cache.rs
//
// File-backed credential cache shared with the AWS CLI (`~/.aws/cli/cache`).
// One JSON document per cache key; staleness is decided at read time, files
// are never deleted.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::fs as tokio_fs;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CacheError, PersistError};
use crate::sys::cache_key::CacheKey;
use crate::sys::secrets::Credentials;
use crate::sys::traits::CredentialRetriever;

// ==============================================================================
// 1. On-Disk Format (AWS CLI compatible)
// ==============================================================================

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "Credentials")]
    credentials: CachedCredentials,
}

/// 🛡️ Plaintext copy of the secrets, alive only while encoding or decoding.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "PascalCase")]
struct CachedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    #[zeroize(skip)]
    #[serde(with = "expire_time")]
    expiration: DateTime<Utc>,
}

impl From<&Credentials> for CachedCredentials {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expiration: creds.expiration,
        }
    }
}

impl From<&CachedCredentials> for Credentials {
    fn from(cached: &CachedCredentials) -> Self {
        Credentials::new(
            cached.access_key_id.clone(),
            cached.secret_access_key.clone(),
            cached.session_token.clone(),
            cached.expiration,
        )
    }
}

/// `Expiration` is written as `2006-01-02T15:04:05+00:00`: literal offset, no
/// fractional seconds. The AWS CLI compares against exactly this shape.
pub(crate) mod expire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

    pub fn format(t: &DateTime<Utc>) -> String {
        t.format(FORMAT).to_string()
    }

    /// Strict form first, then any RFC 3339 timestamp (files written by botocore).
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .map(|naive| naive.and_utc())
            .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)))
    }

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(D::Error::custom)
    }
}

// ==============================================================================
// 2. Cache Store
// ==============================================================================

pub struct FileCredentialCache {
    cache_dir: PathBuf,
    key: CacheKey,
    retriever: Arc<dyn CredentialRetriever>,
    clock: fn() -> DateTime<Utc>,
}

impl FileCredentialCache {
    pub fn new(cache_dir: PathBuf, key: CacheKey, retriever: Arc<dyn CredentialRetriever>) -> Self {
        Self {
            cache_dir,
            key,
            retriever,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(self.key.file_name())
    }

    /// Returns unexpired cached credentials, or retrieves and caches fresh ones.
    /// Any problem reading the cache is a miss, never an error.
    pub async fn load(&self, skip_cache: bool) -> Result<Credentials, CacheError> {
        if !skip_cache {
            let now = (self.clock)();
            match self.read().await {
                Ok(creds) if !creds.is_expired_at(now) => {
                    debug!(key = %self.key, expiration = %creds.expiration, "using cached credentials");
                    return Ok(creds);
                }
                Ok(creds) => {
                    debug!(key = %self.key, expiration = %creds.expiration, "cached credentials expired");
                }
                Err(reason) => debug!(key = %self.key, %reason, "no usable cached credentials"),
            }
        }

        let creds = self.retriever.retrieve().await?;

        if let Err(source) = self.save(&creds) {
            return Err(CacheError::Persist {
                credentials: Box::new(creds),
                source,
            });
        }
        Ok(creds)
    }

    async fn read(&self) -> Result<Credentials, String> {
        let path = self.path();
        let data = tokio_fs::read(&path)
            .await
            .map_err(|e| format!("failed to read cache file: {}", e))?;
        let doc: CacheDocument = serde_json::from_slice(&data)
            .map_err(|e| format!("failed to decode cache json: {}", e))?;
        Ok(Credentials::from(&doc.credentials))
    }

    /// Writes `creds` under the cache key, replacing any previous file in one rename.
    /// The cache directory is owned by the AWS CLI: it is never created here.
    pub fn save(&self, creds: &Credentials) -> Result<(), PersistError> {
        if !self.cache_dir.is_dir() {
            return Err(PersistError::MissingRoot(self.cache_dir.clone()));
        }

        let doc = CacheDocument {
            credentials: CachedCredentials::from(creds),
        };
        let mut data = serde_json::to_vec(&doc)?;
        drop(doc);

        let path = self.path();
        let write_err = |source| PersistError::Write {
            path: path.clone(),
            source,
        };

        // 🛡️ Sibling temp file: same filesystem for the rename, rw------- from inception.
        let result = (|| -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&self.cache_dir)?;
            tmp.as_file().set_permissions(Permissions::from_mode(0o600))?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })();

        data.zeroize();
        result.map_err(write_err)?;

        info!(path = %path.display(), expiration = %creds.expiration, "cached credentials");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RetrieveError;
    use crate::sys::cache_key::AssumeRoleParameters;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls and hands out numbered credentials.
    pub(crate) struct FakeRetriever {
        pub calls: AtomicUsize,
        pub expiration: DateTime<Utc>,
        pub fail: bool,
    }

    impl FakeRetriever {
        pub(crate) fn new(expiration: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expiration,
                fail: false,
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expiration: later(),
                fail: true,
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialRetriever for FakeRetriever {
        async fn retrieve(&self) -> Result<Credentials, RetrieveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(RetrieveError::AssumeRole("AccessDenied".into()));
            }
            Ok(Credentials::new(
                format!("AKIA{n}"),
                format!("secret{n}"),
                format!("token{n}"),
                self.expiration,
            ))
        }
    }

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 13, 0, 0).unwrap()
    }

    /// `<tmp>/.aws/cli/cache`, already provisioned and empty.
    pub(crate) fn aws_home() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let cache_dir = tmp.path().join(".aws").join("cli").join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        (tmp, cache_dir)
    }

    pub(crate) fn key() -> CacheKey {
        AssumeRoleParameters {
            duration_seconds: 3600,
            role_arn: "arn:aws:iam::123456789012:role/test".into(),
            ..Default::default()
        }
        .cache_key()
    }

    fn store(cache_dir: &Path, retriever: Arc<FakeRetriever>) -> FileCredentialCache {
        FileCredentialCache::new(cache_dir.to_path_buf(), key(), retriever).with_clock(now)
    }

    fn read_doc(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn save_then_load_returns_cached_without_upstream() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));

        let original = Credentials::new("AKIAX", "sekrit", "tok", later());
        cache.save(&original).unwrap();

        let loaded = cache.load(false).await.unwrap();
        assert_eq!(retriever.calls(), 0);
        assert_eq!(loaded.access_key_id, "AKIAX");
        assert_eq!(loaded.secret_access_key(), "sekrit");
        assert_eq!(loaded.session_token(), "tok");
        assert_eq!(loaded.expiration, later());
    }

    #[tokio::test]
    async fn miss_retrieves_and_persists() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));

        let creds = cache.load(false).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(retriever.calls(), 1);

        let doc = read_doc(&cache.path());
        assert_eq!(doc["Credentials"]["AccessKeyId"], "AKIA1");
        assert_eq!(doc["Credentials"]["SecretAccessKey"], "secret1");
        assert_eq!(doc["Credentials"]["SessionToken"], "token1");
        assert_eq!(doc["Credentials"]["Expiration"], "2030-01-01T13:00:00+00:00");

        // Second load is served from disk.
        cache.load(false).await.unwrap();
        assert_eq!(retriever.calls(), 1);
    }

    #[tokio::test]
    async fn expiration_equal_to_now_is_expired() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));
        cache
            .save(&Credentials::new("AKIAOLD", "s", "t", now()))
            .unwrap();

        let creds = cache.load(false).await.unwrap();
        assert_eq!(retriever.calls(), 1);
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(read_doc(&cache.path())["Credentials"]["AccessKeyId"], "AKIA1");
    }

    #[tokio::test]
    async fn skip_cache_always_refreshes_and_rewrites() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));
        cache
            .save(&Credentials::new("AKIAVALID", "s", "t", later()))
            .unwrap();

        let creds = cache.load(true).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(retriever.calls(), 1);
        assert_eq!(read_doc(&cache.path())["Credentials"]["AccessKeyId"], "AKIA1");

        cache.load(true).await.unwrap();
        assert_eq!(retriever.calls(), 2);
        assert_eq!(read_doc(&cache.path())["Credentials"]["AccessKeyId"], "AKIA2");
    }

    #[tokio::test]
    async fn malformed_json_is_a_miss() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));
        std::fs::write(cache.path(), b"{\"Credentials\": {not json").unwrap();

        let creds = cache.load(false).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(retriever.calls(), 1);
    }

    #[tokio::test]
    async fn bad_expiration_is_a_miss() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));
        std::fs::write(
            cache.path(),
            br#"{"Credentials":{"AccessKeyId":"a","SecretAccessKey":"b","SessionToken":"c","Expiration":"tomorrow"}}"#,
        )
        .unwrap();

        cache.load(false).await.unwrap();
        assert_eq!(retriever.calls(), 1);
    }

    #[tokio::test]
    async fn reads_files_written_by_the_aws_cli() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));
        std::fs::write(
            cache.path(),
            br#"{"Credentials":{"AccessKeyId":"AKIACLI","SecretAccessKey":"b","SessionToken":"c","Expiration":"2030-01-01T13:00:00Z"},"AssumedRoleUser":{"Arn":"x"}}"#,
        )
        .unwrap();

        let creds = cache.load(false).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIACLI");
        assert_eq!(retriever.calls(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_propagates_and_writes_nothing() {
        let (_tmp, dir) = aws_home();
        let retriever = FakeRetriever::failing();
        let cache = store(&dir, Arc::clone(&retriever));

        let err = cache.load(false).await.unwrap_err();
        assert!(matches!(err, CacheError::Retrieve(RetrieveError::AssumeRole(_))));
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn missing_root_is_a_persist_error_carrying_credentials() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".aws").join("cli").join("cache");
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));

        let err = cache.load(false).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Persist {
                source: PersistError::MissingRoot(_),
                ..
            }
        ));
        assert_eq!(err.into_credentials().unwrap().access_key_id, "AKIA1");
        assert!(!tmp.path().join(".aws").exists());
    }

    #[tokio::test]
    async fn absent_cache_directory_is_never_created() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".aws")).unwrap();
        let dir = tmp.path().join(".aws").join("cli").join("cache");
        let retriever = FakeRetriever::new(later());
        let cache = store(&dir, Arc::clone(&retriever));

        let err = cache.load(false).await.unwrap_err();
        match &err {
            CacheError::Persist {
                source: PersistError::MissingRoot(path),
                ..
            } => assert_eq!(path, &dir),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.into_credentials().unwrap().access_key_id, "AKIA1");
        assert!(!tmp.path().join(".aws").join("cli").exists());
    }

    #[test]
    fn save_locks_down_file() {
        let (_tmp, dir) = aws_home();
        let cache = store(&dir, FakeRetriever::new(later()));
        cache
            .save(&Credentials::new("AKIA", "s", "t", later()))
            .unwrap();

        let mode = std::fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        // Only the final file remains; the temp sibling was renamed away.
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[test]
    fn expiration_format_round_trips_to_the_second() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap()
            + chrono::Duration::milliseconds(750);
        let text = expire_time::format(&t);
        assert_eq!(text, "2024-02-29T23:59:58+00:00");
        assert!(!text.ends_with('Z'));

        let parsed = expire_time::parse(&text).unwrap();
        assert_eq!(parsed.timestamp(), t.timestamp());
    }
}
