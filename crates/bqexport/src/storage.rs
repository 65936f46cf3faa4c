// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Staging storage: the collaborator interface and its `object_store` backend

use crate::error::ClientError;
use crate::rest::{ProxySettings, RestClient};
use crate::target::StagingLocation;
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, WriteMultipart};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;

const GCS_JSON_API: &str = "https://storage.googleapis.com/storage/v1";

/// Upload parts allowed in flight per blob before `append` waits.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// An append-only upload of a single staging blob.
///
/// Nothing is visible under the blob's path until `finish` succeeds.
#[async_trait]
pub trait BlobSink: Send {
    async fn append(&mut self, bytes: Bytes) -> Result<(), ClientError>;

    async fn finish(self: Box<Self>) -> Result<(), ClientError>;

    async fn abort(self: Box<Self>) -> Result<(), ClientError>;
}

/// Object-level operations the coordinator and writers need from the staging store.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create the bucket in `region` when it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str, region: Option<&str>) -> Result<(), ClientError>;

    /// `gs://` URIs of every blob under `prefix`, sorted.
    async fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ClientError>;

    /// Delete every blob under `prefix`; returns how many were removed.
    async fn delete_blobs(&self, bucket: &str, prefix: &str) -> Result<usize, ClientError>;

    async fn open_blob(&self, location: &StagingLocation) -> Result<Box<dyn BlobSink>, ClientError>;
}

/// Settings for the GCS-backed staging store.
#[derive(Debug, Clone, Default)]
pub struct GcsOptions {
    pub project: String,
    /// Path to a service-account key; falls back to the environment.
    pub credentials: Option<String>,
    /// Bearer token for bucket administration.
    pub access_token: Option<String>,
    pub proxy: Option<ProxySettings>,
}

/// [`StorageClient`] over any object store bound to a single bucket.
pub struct ObjectStoreStaging {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    admin: Option<BucketAdmin>,
}

impl ObjectStoreStaging {
    /// Wrap an existing store. Bucket creation becomes a no-op.
    #[must_use]
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
            admin: None,
        }
    }

    /// Google Cloud Storage, with proxy and credentials passed explicitly.
    pub fn gcs(bucket: impl Into<String>, options: &GcsOptions) -> Result<Self, ClientError> {
        let bucket = bucket.into();

        let mut client_options = ClientOptions::new();
        if let Some(proxy) = &options.proxy {
            client_options = client_options.with_proxy_url(proxy.url());
        }

        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&bucket)
            .with_client_options(client_options);
        if let Some(path) = &options.credentials {
            builder = builder.with_service_account_path(path);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);

        let admin = match &options.access_token {
            Some(token) => Some(BucketAdmin {
                rest: RestClient::new(token.clone(), options.proxy.as_ref())?,
                project: options.project.clone(),
            }),
            None => None,
        };

        Ok(Self { bucket, store, admin })
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(ClientError::Configuration(format!(
                "staging store is bound to bucket {}, not {bucket}",
                self.bucket
            )))
        }
    }

    /// Staging operations never touch the bucket root.
    fn scoped_prefix(prefix: &str) -> Result<Path, ClientError> {
        if prefix.trim_matches('/').is_empty() {
            return Err(ClientError::Configuration(
                "refusing to operate on the bucket root, staging prefix is empty".to_string(),
            ));
        }
        Ok(Path::from(prefix))
    }

    async fn list_paths(&self, prefix: &str) -> Result<Vec<Path>, ClientError> {
        let prefix = Self::scoped_prefix(prefix)?;
        let mut paths: Vec<Path> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl StorageClient for ObjectStoreStaging {
    async fn ensure_bucket(&self, bucket: &str, region: Option<&str>) -> Result<(), ClientError> {
        self.check_bucket(bucket)?;
        match &self.admin {
            Some(admin) => admin.ensure_bucket(bucket, region).await,
            None => Ok(()),
        }
    }

    async fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ClientError> {
        self.check_bucket(bucket)?;
        Ok(self
            .list_paths(prefix)
            .await?
            .into_iter()
            .map(|path| format!("gs://{bucket}/{path}"))
            .collect())
    }

    async fn delete_blobs(&self, bucket: &str, prefix: &str) -> Result<usize, ClientError> {
        self.check_bucket(bucket)?;
        let paths = self.list_paths(prefix).await?;
        for path in &paths {
            match self.store.delete(path).await {
                Ok(()) => {}
                // Already gone, e.g. removed by an earlier attempt.
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let count = paths.len();
        debug!("deleted {count} blobs under gs://{bucket}/{prefix}");
        Ok(count)
    }

    async fn open_blob(&self, location: &StagingLocation) -> Result<Box<dyn BlobSink>, ClientError> {
        self.check_bucket(&location.bucket)?;
        let upload = self.store.put_multipart(&Path::from(location.path.as_str())).await?;
        Ok(Box::new(MultipartSink {
            upload: WriteMultipart::new(upload),
        }))
    }
}

/// Streams appended bytes into a multipart upload.
struct MultipartSink {
    upload: WriteMultipart,
}

#[async_trait]
impl BlobSink for MultipartSink {
    async fn append(&mut self, bytes: Bytes) -> Result<(), ClientError> {
        self.upload.write(&bytes);
        self.upload.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), ClientError> {
        self.upload.finish().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), ClientError> {
        self.upload.abort().await?;
        Ok(())
    }
}

/// Bucket creation through the GCS JSON API, which `object_store` does not cover.
struct BucketAdmin {
    rest: RestClient,
    project: String,
}

impl BucketAdmin {
    async fn ensure_bucket(&self, bucket: &str, region: Option<&str>) -> Result<(), ClientError> {
        let url = format!("{GCS_JSON_API}/b/{bucket}");
        match self.rest.send_empty(Method::GET, &url, None).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut body = json!({ "name": bucket });
        if let Some(region) = region {
            body["location"] = json!(region);
        }
        let url = format!("{GCS_JSON_API}/b?project={}", self.project);
        info!("creating staging bucket {bucket}");
        match self.rest.send_empty(Method::POST, &url, Some(&body)).await {
            Err(e) if e.is_conflict() => Ok(()),
            other => other,
        }
    }
}
