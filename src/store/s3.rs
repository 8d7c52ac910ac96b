//! Anonymous S3 client for public-read buckets.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

use super::{ListPage, ObjectMetadata, ObjectStore, ObjectStream, StoreError};

/// [`ObjectStore`] backed by `aws-sdk-s3` with request signing disabled.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

async fn build_client(region: &str, endpoint_url: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .no_credentials();
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    let sdk_config = loader.load().await;
    // Custom endpoints (MinIO, Ceph, ...) rarely support virtual-hosted buckets.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();
    Client::from_conf(s3_config)
}

impl S3Store {
    /// Build a client for `bucket`.
    ///
    /// Against AWS the configured region is only a first guess: a public
    /// bucket answers `HeadBucket` from the wrong region with its real region
    /// in the `x-amz-bucket-region` header, and the client is rebuilt for it.
    pub async fn connect(bucket: &str, region: &str, endpoint_url: Option<&str>) -> Self {
        let client = build_client(region, endpoint_url).await;
        if endpoint_url.is_some() {
            return Self {
                client,
                bucket: bucket.to_string(),
            };
        }

        let client = match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => client,
            Err(err) => {
                let detected = err
                    .raw_response()
                    .and_then(|res| res.headers().get("x-amz-bucket-region"))
                    .map(str::to_owned);
                match detected {
                    Some(actual) if actual != region => {
                        tracing::debug!(bucket, region = %actual, "Bucket lives in another region");
                        build_client(&actual, None).await
                    }
                    Some(_) => client,
                    None => {
                        tracing::warn!(
                            "HeadBucket on {} failed, keeping region {}: {}",
                            bucket,
                            region,
                            DisplayErrorContext(&err)
                        );
                        client
                    }
                }
            }
        };

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation.map(str::to_owned))
            .send()
            .await
            .map_err(|e| StoreError::request("ListObjectsV2", DisplayErrorContext(&e).to_string()))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_owned))
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_owned)
        } else {
            None
        };

        Ok(ListPage { keys, next_token })
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    StoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    StoreError::request("HeadObject", DisplayErrorContext(&err).to_string())
                }
            })?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StoreError::request("HeadObject", "missing or invalid Content-Length"))?;
        let last_modified = output
            .last_modified()
            .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()));

        Ok(ObjectMetadata {
            size,
            last_modified,
        })
    }

    async fn get(&self, key: &str) -> Result<ObjectStream, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    StoreError::request("GetObject", DisplayErrorContext(&err).to_string())
                }
            })?;

        let body = stream::unfold(output.body, |mut body| async move {
            body.next().await.map(|chunk| {
                let chunk = chunk.map_err(|e| StoreError::Body(DisplayErrorContext(&e).to_string()));
                (chunk, body)
            })
        });
        Ok(body.boxed())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
