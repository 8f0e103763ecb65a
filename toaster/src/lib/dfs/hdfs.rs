use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dfs::{DfsClient, DfsPath, SUCCESS_FLAG};
use crate::errors::StorageError;
use crate::exec::CommandRunner;

/// HDFS backend shelling out to `hadoop fs`. `HADOOP_HOME` must be set in
/// the environment the runner executes in.
pub struct HdfsDfs {
    runner: Arc<dyn CommandRunner>,
}

impl HdfsDfs {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        HdfsDfs { runner }
    }

    async fn fs_command(&self, args: &str) -> Result<(), StorageError> {
        let script = format!("$HADOOP_HOME/bin/hadoop fs {args}");
        let status = self.runner.run(&script).await?;
        if status != 0 {
            return Err(StorageError::CommandFailed {
                op: script,
                status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DfsClient for HdfsDfs {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError> {
        let script = format!("$HADOOP_HOME/bin/hadoop fs -test -e {}", path.url());
        let status = self.runner.run(&script).await?;
        Ok(status == 0)
    }

    async fn put(&self, local: &Path, path: &DfsPath) -> Result<(), StorageError> {
        if let Some((parent, _)) = path.url().rsplit_once('/') {
            self.fs_command(&format!("-mkdir -p {parent}")).await?;
        }
        self.fs_command(&format!("-put {} {}", local.display(), path.url()))
            .await
    }

    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError> {
        self.fs_command(&format!("-mv {} {}", src.url(), dst.url()))
            .await
    }

    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError> {
        let flag = if recursive { "-rm -r" } else { "-rm" };
        self.fs_command(&format!("{flag} {}", path.url())).await
    }

    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError> {
        self.fs_command(&format!("-mkdir -p {}", dir.url())).await?;
        self.fs_command(&format!("-touchz {}", dir.join(SUCCESS_FLAG).url()))
            .await
    }
}
