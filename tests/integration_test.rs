use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use s3fetch::downloader::{download, DownloadArgs};
use s3fetch::error::S3FetchError;
use s3fetch::s3_client::S3Client;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::localstack::LocalStack;
use tokio::sync::OnceCell;

/// Shared LocalStack container for all tests
static LOCALSTACK: OnceCell<Arc<ContainerAsync<LocalStack>>> = OnceCell::const_new();

async fn get_localstack() -> Arc<ContainerAsync<LocalStack>> {
    LOCALSTACK
        .get_or_init(|| async {
            let container = LocalStack::default()
                .with_env_var("SERVICES", "s3")
                .start()
                .await
                .expect("Failed to start LocalStack");
            Arc::new(container)
        })
        .await
        .clone()
}

/// Raw SDK client pointed at LocalStack, used for both seeding and downloading
async fn create_test_client() -> Client {
    let localstack = get_localstack().await;
    let port = localstack
        .get_host_port_ipv4(4566)
        .await
        .expect("Failed to get port");

    let credentials = Credentials::new("test", "test", None, None, "test");
    let config = aws_config::defaults(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new("us-east-1"))
        .endpoint_url(format!("http://127.0.0.1:{}", port))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(true)
        .build();
    Client::from_conf(s3_config)
}

async fn seed_bucket(client: &Client, bucket: &str, objects: &[(&str, Vec<u8>)]) -> anyhow::Result<()> {
    client
        .create_bucket()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create bucket: {}", e))?;

    for (key, content) in objects {
        client
            .put_object()
            .bucket(bucket)
            .key(*key)
            .body(ByteStream::from(content.clone()))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to upload {}: {}", key, e))?;
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_download_prefix() -> anyhow::Result<()> {
    let client = create_test_client().await;
    let bucket = "test-prefix-bucket";
    seed_bucket(
        &client,
        bucket,
        &[
            ("photos/2020/cake.jpg", b"cake".to_vec()),
            ("photos/2020/party/balloons.jpg", b"balloons".to_vec()),
            ("photos/2020/", Vec::new()),
            ("videos/clip.mp4", b"not included".to_vec()),
        ],
    )
    .await?;

    let dir = TempDir::new()?;
    let args = DownloadArgs::builder()
        .s3_uri(format!("s3://{}/photos/2020/", bucket))
        .download_dir(dir.path())
        .threads(2)
        .build();

    let summary = download(Arc::new(S3Client::new(client)), args).await?;

    assert_eq!(summary.succeeded, 2);
    assert!(summary.is_success());
    assert_eq!(std::fs::read(dir.path().join("cake.jpg"))?, b"cake");
    assert_eq!(
        std::fs::read(dir.path().join("party").join("balloons.jpg"))?,
        b"balloons"
    );
    assert!(!dir.path().join("clip.mp4").exists());
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_download_paginated_listing() -> anyhow::Result<()> {
    let client = create_test_client().await;
    let bucket = "test-paginated-bucket";
    let objects: Vec<(String, Vec<u8>)> = (0..1100)
        .map(|i| (format!("many/{:04}.txt", i), i.to_string().into_bytes()))
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = objects
        .iter()
        .map(|(key, body)| (key.as_str(), body.clone()))
        .collect();
    seed_bucket(&client, bucket, &borrowed).await?;

    let dir = TempDir::new()?;
    let args = DownloadArgs::builder()
        .s3_uri(format!("s3://{}/many/", bucket))
        .download_dir(dir.path())
        .threads(16)
        .build();

    let summary = download(Arc::new(S3Client::new(client)), args).await?;

    assert_eq!(summary.succeeded, 1100);
    assert_eq!(std::fs::read_to_string(dir.path().join("1099.txt"))?, "1099");
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_download_empty_file() -> anyhow::Result<()> {
    let client = create_test_client().await;
    let bucket = "test-empty-bucket";
    seed_bucket(&client, bucket, &[("empty.txt", Vec::new())]).await?;

    let dir = TempDir::new()?;
    let args = DownloadArgs::builder()
        .s3_uri(format!("s3://{}", bucket))
        .download_dir(dir.path())
        .build();

    let summary = download(Arc::new(S3Client::new(client)), args).await?;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(std::fs::metadata(dir.path().join("empty.txt"))?.len(), 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_missing_bucket_is_fatal() -> anyhow::Result<()> {
    let client = create_test_client().await;

    let dir = TempDir::new()?;
    let args = DownloadArgs::builder()
        .s3_uri("s3://bucket-that-does-not-exist/prefix")
        .download_dir(dir.path())
        .build();

    let err = download(Arc::new(S3Client::new(client)), args)
        .await
        .unwrap_err();

    assert!(matches!(err, S3FetchError::NoSuchBucket(_)));
    Ok(())
}
