use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use log::info;

use crate::dfs::{DfsClient, DfsPath, SUCCESS_FLAG};
use crate::errors::StorageError;

/// Object-store backend over the S3 API.
pub struct S3Dfs {
    inner: aws_sdk_s3::Client,
}

impl S3Dfs {
    pub fn new(inner: aws_sdk_s3::Client) -> Self {
        S3Dfs { inner }
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let result = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()) == Some(true) {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DfsClient for S3Dfs {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError> {
        let (bucket, key) = path.as_bucket_key();
        self.head(&bucket, &key).await
    }

    async fn put(&self, local: &Path, path: &DfsPath) -> Result<(), StorageError> {
        let (bucket, key) = path.as_bucket_key();
        info!("uploading {} to s3://{bucket}/{key}", local.display());
        let body = ByteStream::from_path(local).await?;
        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError> {
        // The S3 API has no rename; copy-then-delete is the convention.
        let (src_bucket, src_key) = src.as_bucket_key();
        let (dst_bucket, dst_key) = dst.as_bucket_key();
        self.inner
            .copy_object()
            .copy_source(format!("{src_bucket}/{src_key}"))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await?;
        self.delete(&src_bucket, &src_key).await
    }

    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError> {
        let (bucket, key) = path.as_bucket_key();
        if !recursive {
            return self.delete(&bucket, &key).await;
        }

        let prefix = format!("{key}/");
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .inner
                .list_objects_v2()
                .bucket(&bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await?;
            for object in page.contents() {
                if let Some(k) = object.key() {
                    self.delete(&bucket, k).await?;
                }
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        // The prefix may also exist as a bare marker object.
        if self.head(&bucket, &key).await? {
            self.delete(&bucket, &key).await?;
        }
        Ok(())
    }

    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError> {
        let (bucket, key) = dir.join(SUCCESS_FLAG).as_bucket_key();
        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .send()
            .await?;
        Ok(())
    }
}
