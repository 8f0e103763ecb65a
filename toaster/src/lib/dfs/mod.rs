use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::S3Config;
use crate::errors::{ConfigError, StorageError};
use crate::exec::CommandRunner;
use crate::util::join_url;

pub mod hdfs;
pub mod local;
pub mod s3;

pub use hdfs::HdfsDfs;
pub use local::LocalDfs;
pub use s3::S3Dfs;

/// Zero-byte sentinel whose presence is the sole completion signal for a
/// directory's contents. Directory existence alone means nothing.
pub const SUCCESS_FLAG: &str = "_SUCCESS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Local,
    Hdfs,
    S3,
}

/// A DFS location with its scheme resolved once at construction instead of
/// re-parsed on every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsPath {
    scheme: Scheme,
    url: String,
}

impl DfsPath {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let scheme = if url.starts_with("s3:") || url.starts_with("s3n:") || url.starts_with("s3a:")
        {
            Scheme::S3
        } else if url.starts_with("hdfs:") {
            Scheme::Hdfs
        } else if url.starts_with("file:") {
            Scheme::Local
        } else {
            return Err(ConfigError::UnrecognizedScheme {
                url: url.to_string(),
            });
        };
        Ok(DfsPath {
            scheme,
            url: url.to_string(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn join(&self, segment: &str) -> DfsPath {
        DfsPath {
            scheme: self.scheme,
            url: join_url(&self.url, segment),
        }
    }

    /// Filesystem path for `file:` URLs.
    pub fn as_local_path(&self) -> PathBuf {
        let rest = self
            .url
            .strip_prefix("file://")
            .or_else(|| self.url.strip_prefix("file:"))
            .unwrap_or(&self.url);
        PathBuf::from(rest)
    }

    /// `(bucket, key)` for object-store URLs.
    pub fn as_bucket_key(&self) -> (String, String) {
        let rest = self
            .url
            .splitn(2, "://")
            .nth(1)
            .unwrap_or(&self.url);
        match rest.split_once('/') {
            Some((bucket, key)) => (bucket.to_string(), key.trim_end_matches('/').to_string()),
            None => (rest.to_string(), String::new()),
        }
    }
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Uniform contract over the storage backends. All mutating operations are
/// remote calls; callers must not assume atomicity across two of them.
#[async_trait]
pub trait DfsClient: Send + Sync {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError>;
    async fn put(&self, local: &Path, path: &DfsPath) -> Result<(), StorageError>;
    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError>;
    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError>;

    /// Writes the zero-byte success marker into the directory.
    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError>;

    /// Checks the marker, not the directory.
    async fn is_complete(&self, dir: &DfsPath) -> Result<bool, StorageError> {
        self.exists(&dir.join(SUCCESS_FLAG)).await
    }
}

/// Scheme-dispatching facade. Backends are constructed once; each call is
/// routed by the path's already-parsed scheme.
pub struct Dfs {
    local: LocalDfs,
    hdfs: HdfsDfs,
    s3: Option<S3Dfs>,
}

impl Dfs {
    pub fn new(runner: Arc<dyn CommandRunner>, s3: Option<&S3Config>) -> Self {
        Dfs {
            local: LocalDfs,
            hdfs: HdfsDfs::new(runner),
            s3: s3.map(|config| S3Dfs::new(config.create_client())),
        }
    }

    fn client_for(&self, scheme: Scheme) -> Result<&dyn DfsClient, StorageError> {
        match scheme {
            Scheme::Local => Ok(&self.local),
            Scheme::Hdfs => Ok(&self.hdfs),
            Scheme::S3 => self
                .s3
                .as_ref()
                .map(|c| c as &dyn DfsClient)
                .ok_or(StorageError::BackendUnavailable { scheme: "s3" }),
        }
    }
}

#[async_trait]
impl DfsClient for Dfs {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError> {
        self.client_for(path.scheme())?.exists(path).await
    }

    async fn put(&self, local: &Path, path: &DfsPath) -> Result<(), StorageError> {
        self.client_for(path.scheme())?.put(local, path).await
    }

    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError> {
        self.client_for(src.scheme())?.mv(src, dst).await
    }

    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError> {
        self.client_for(path.scheme())?.rm(path, recursive).await
    }

    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError> {
        self.client_for(dir.scheme())?.mark_complete(dir).await
    }

    async fn is_complete(&self, dir: &DfsPath) -> Result<bool, StorageError> {
        self.client_for(dir.scheme())?.is_complete(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_schemes() {
        assert_eq!(DfsPath::parse("s3://bucket/k").unwrap().scheme(), Scheme::S3);
        assert_eq!(DfsPath::parse("s3n://bucket/k").unwrap().scheme(), Scheme::S3);
        assert_eq!(DfsPath::parse("s3a://bucket/k").unwrap().scheme(), Scheme::S3);
        assert_eq!(DfsPath::parse("hdfs://nn/x").unwrap().scheme(), Scheme::Hdfs);
        assert_eq!(DfsPath::parse("file:///x").unwrap().scheme(), Scheme::Local);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = DfsPath::parse("ftp://host/x").unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedScheme { .. }));
    }

    #[test]
    fn bucket_key_split() {
        let path = DfsPath::parse("s3://genomics/dbsnp/raw").unwrap();
        let (bucket, key) = path.as_bucket_key();
        assert_eq!(bucket, "genomics");
        assert_eq!(key, "dbsnp/raw");
    }

    #[test]
    fn local_path_strips_scheme() {
        let path = DfsPath::parse("file:///tmp/toaster").unwrap();
        assert_eq!(path.as_local_path(), PathBuf::from("/tmp/toaster"));
    }

    #[test]
    fn join_keeps_scheme() {
        let path = DfsPath::parse("hdfs://nn/data").unwrap().join(SUCCESS_FLAG);
        assert_eq!(path.url(), "hdfs://nn/data/_SUCCESS");
        assert_eq!(path.scheme(), Scheme::Hdfs);
    }
}
