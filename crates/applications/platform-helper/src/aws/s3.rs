//! S3 client

use super::sdk_error;
use crate::error::{PlatformError, Result};
use crate::providers::s3::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::Client;

pub struct S3Client {
    client: Client,
}

impl S3Client {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("GetObject", e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| PlatformError::aws("GetObject", None, e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }
}
