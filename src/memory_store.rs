//! In-process [`ObjectStore`] for embedding and tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, S3FetchError};
use crate::s3_client::{create_destination, ChunkCallback, ObjectPage, ObjectStore};

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Buckets of objects held in memory. Listings are lexicographic, like S3.
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, Bytes>>>,
    page_size: usize,
    chunk_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Maximum number of keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Size of the chunks handed to the transfer callback.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object, creating the bucket if needed.
    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    fn object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| S3FetchError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| S3FetchError::NoSuchKey(format!("s3://{}/{}", bucket, key)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| S3FetchError::NoSuchBucket(bucket.to_string()))?;

        let start = match continuation_token.as_deref() {
            Some(token) => Bound::Excluded(token),
            None => Bound::Unbounded,
        };

        let mut keys: Vec<String> = objects
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64> {
        let body = self.object(bucket, key)?;
        let mut file = create_destination(destination).await?;

        for chunk in body.chunks(self.chunk_size) {
            file.write_all(chunk).await?;
            on_chunk(chunk.len() as u64)?;
            tokio::task::yield_now().await;
        }

        file.flush().await?;
        Ok(body.len() as u64)
    }
}
