use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use backon::{ExponentialBuilder, Retryable};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, S3FetchError};

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

/// Called with the size of every chunk written during a transfer. Returning
/// an error aborts the transfer with that error.
pub type ChunkCallback<'a> = &'a (dyn Fn(u64) -> Result<()> + Send + Sync);

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage>;

    /// Write the object body to `destination`, returning the number of bytes written.
    ///
    /// Implementations open the destination with [`create_destination`] only
    /// once the object is known to exist, so a missing or forbidden key leaves
    /// nothing on disk.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64>;
}

/// Create `destination` and any missing parent directories.
pub async fn create_destination(destination: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(tokio::fs::File::create(destination).await?)
}

pub struct S3Client {
    client: Client,
}

impl S3Client {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the environment, resolving credentials up front so
    /// missing or broken credentials fail before any listing starts.
    pub async fn from_env(region: &str, endpoint_url: Option<&str>) -> Result<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        let provider = config.credentials_provider().ok_or_else(|| {
            S3FetchError::NoCredentials("no credentials provider configured".to_string())
        })?;
        provider
            .provide_credentials()
            .await
            .map_err(classify_credentials_error)?;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
        if endpoint_url.is_some() {
            // S3-compatible endpoints rarely support virtual-hosted buckets
            s3_config = s3_config.force_path_style(true);
        }

        Ok(Self::new(Client::from_conf(s3_config.build())))
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage> {
        let response = (|| async {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            request.send().await
        })
        .retry(retry_policy())
        .when(|e| is_transient(e))
        .await
        .map_err(|e| classify_sdk_error(e, bucket))?;

        let keys: Vec<String> = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        debug!(bucket, prefix, keys = keys.len(), more = next_token.is_some(), "Listed page");
        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64> {
        let response = (|| async { self.client.get_object().bucket(bucket).key(key).send().await })
            .retry(retry_policy())
            .when(|e| is_transient(e))
            .await
            .map_err(|e| classify_sdk_error(e, &format!("s3://{}/{}", bucket, key)))?;

        let mut body = response.body;
        let mut file = create_destination(destination).await?;
        let mut written = 0u64;

        while let Some(chunk) = body.try_next().await.map_err(|e| {
            S3FetchError::S3Error(format!(
                "Failed to read response body: {}",
                DisplayErrorContext(&e)
            ))
        })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64)?;
        }

        file.flush().await?;
        Ok(written)
    }
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_max_times(3)
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
}

/// Only transport-level failures are retried; service errors are final.
fn is_transient<E, R>(err: &SdkError<E, R>) -> bool {
    matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    )
}

/// Map an SDK error onto the crate taxonomy using the S3 error code.
fn classify_sdk_error<E, R>(err: SdkError<E, R>, resource: &str) -> S3FetchError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err.as_service_error().and_then(|e| e.code()) {
        Some("InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken") => {
            S3FetchError::InvalidCredentials(detail)
        }
        Some("AccessDenied") => S3FetchError::PermissionDenied(resource.to_string()),
        Some("NoSuchBucket") => S3FetchError::NoSuchBucket(resource.to_string()),
        Some("NoSuchKey") => S3FetchError::NoSuchKey(resource.to_string()),
        _ => S3FetchError::S3Error(detail),
    }
}

fn classify_credentials_error(err: CredentialsError) -> S3FetchError {
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        CredentialsError::CredentialsNotLoaded(_) => S3FetchError::NoCredentials(detail),
        _ => S3FetchError::InvalidCredentials(detail),
    }
}
