use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use crate::dfs::{DfsClient, DfsPath, SUCCESS_FLAG};
use crate::errors::StorageError;

/// `file:` backend, mostly useful for single-node runs and tests.
pub struct LocalDfs;

#[async_trait]
impl DfsClient for LocalDfs {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError> {
        Ok(fs::try_exists(path.as_local_path()).await?)
    }

    async fn put(&self, local: &Path, path: &DfsPath) -> Result<(), StorageError> {
        let dest = path.as_local_path();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, dest).await?;
        Ok(())
    }

    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError> {
        let dest = dst.as_local_path();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(src.as_local_path(), dest).await?;
        Ok(())
    }

    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError> {
        let target = path.as_local_path();
        if recursive {
            fs::remove_dir_all(target).await?;
        } else {
            fs::remove_file(target).await?;
        }
        Ok(())
    }

    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError> {
        let dir_path = dir.as_local_path();
        fs::create_dir_all(&dir_path).await?;
        fs::File::create(dir_path.join(SUCCESS_FLAG)).await?;
        Ok(())
    }
}
