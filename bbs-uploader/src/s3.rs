//! S3 as a file source: objects are streamed into the temp folder before upload.

use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use bbs_uploader_core::contract::{FetchedFile, FileFetcher, ObjectLister, ObjectSummary};
use bbs_uploader_core::download::temporary_destination;
use bbs_uploader_core::error::{AutomationError, AutomationResult};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

pub struct S3Client {
    client: Client,
    bucket: String,
    temp_folder: PathBuf,
}

impl S3Client {
    /// Client for `bucket` in `region`, with credentials from the default provider chain.
    pub async fn new(region: &str, bucket: &str, temp_folder: impl Into<PathBuf>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::from_conf(aws_sdk_s3::Config::new(&config), bucket, temp_folder)
    }

    pub fn from_conf(conf: aws_sdk_s3::Config, bucket: &str, temp_folder: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
            temp_folder: temp_folder.into(),
        }
    }

    /// Stream `key` into `<temp_folder>/<temporary_name>`.
    pub async fn download(&self, key: &str, temporary_name: &str) -> AutomationResult<PathBuf> {
        let destination = temporary_destination(&self.temp_folder, temporary_name);
        info!(
            bucket = %self.bucket,
            file_key = key,
            destination = %destination.display(),
            "Downloading file from S3"
        );

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!(bucket = %self.bucket, file_key = key, error = %DisplayErrorContext(&e), "S3 GetObject failed");
                AutomationError::Fetch(format!(
                    "could not download s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        let mut body = object.body;
        let mut file = tokio::fs::File::create(&destination).await?;
        let mut written = 0usize;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| AutomationError::Fetch(format!("reading s3://{}/{key}: {e}", self.bucket)))?
        {
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(bytes = written, destination = %destination.display(), "S3 download complete");
        Ok(destination)
    }
}

#[async_trait]
impl FileFetcher for S3Client {
    async fn fetch(&self, reference: &str, temporary_name: &str) -> AutomationResult<FetchedFile> {
        let path = self.download(reference, temporary_name).await?;
        Ok(FetchedFile::temporary(path))
    }
}

#[async_trait]
impl ObjectLister for S3Client {
    async fn list_objects(&self, bucket: &str) -> AutomationResult<Vec<ObjectSummary>> {
        info!(bucket, "Listing objects");
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    AutomationError::Fetch(format!(
                        "could not list s3://{bucket}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            objects.extend(page.contents().iter().map(|object| ObjectSummary {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size(),
                last_modified: object.last_modified().map(|t| t.to_string()),
            }));

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        info!(bucket, count = objects.len(), "Listed objects");
        Ok(objects)
    }
}
