//! S3-compatible storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{CopyStatus, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Marker included in lazy-credentials errors so they surface as config errors.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "pkgedit-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "pkgedit-s3-lazy-credentials-resolve";

const HEALTH_CHECK_KEY: &str = ".pkgedit-health-check";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// Backend construction stays free of network and trust-root side effects.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

/// Translate an SDK failure, reporting a 404 on `missing_key` as `NotFound`.
///
/// Lazy-credential failures surface as configuration errors.
fn map_error<E>(err: aws_sdk_s3::error::SdkError<E>, missing_key: Option<&str>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let Some(key) = missing_key
        && is_not_found(&err)
    {
        return StorageError::NotFound(key.to_string());
    }

    let text = err.to_string();
    if text.contains(CREDENTIALS_INIT_ERROR_MARKER) || text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(format!(
            "S3 credentials could not be resolved; set storage.access_key_id and \
             storage.secret_access_key or provide ambient AWS credentials ({text})"
        ));
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

/// Bare `host:port` endpoints (e.g. MinIO in compose files) are plain HTTP.
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// Connection settings for [`S3Backend`].
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub bucket: String,
    /// Custom endpoint (MinIO, R2, ...). `None` uses AWS.
    pub endpoint: Option<String>,
    /// Defaults to `us-east-1`.
    pub region: Option<String>,
    /// Key prefix prepended to every object key.
    pub prefix: Option<String>,
    /// Static `(access_key_id, secret_access_key)`; `None` uses the default AWS chain.
    pub credentials: Option<(String, String)>,
    /// Path-style addressing (`endpoint/bucket/key`), required by MinIO.
    pub force_path_style: bool,
}

/// S3-compatible object store.
///
/// `CopyObject` completes server-side before responding, so `start_copy`
/// reports a terminal status and `copy_status` only confirms the target.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Backend {
    /// Build a client for the configured bucket. No request is sent.
    pub fn new(settings: S3Settings) -> StorageResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::Config("s3 bucket cannot be empty".to_string()));
        }

        let region = settings.region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .force_path_style(settings.force_path_style);

        builder = match settings.credentials {
            Some((key_id, secret)) => builder.credentials_provider(
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "pkgedit-config"),
            ),
            None => builder.credentials_provider(LazyDefaultCredentialsProvider::new(region)),
        };

        if let Some(endpoint) = settings.endpoint.as_deref().map(normalize_endpoint) {
            // Plain-HTTP endpoints skip native trust root loading
            if endpoint.starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            prefix: settings
                .prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    /// Object key in the bucket for a store key.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Store key for an object key in the bucket.
    fn store_key<'a>(&self, full_key: &'a str) -> &'a str {
        self.prefix
            .as_deref()
            .and_then(|prefix| full_key.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full_key)
    }

    /// `CopySource` header value: bucket plus the percent-encoded source key.
    fn copy_source(&self, from: &str) -> String {
        let full_key = self.full_key(from);
        let encoded_key = utf8_percent_encode(&full_key, NON_ALPHANUMERIC);
        format!("{}/{encoded_key}", self.bucket)
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| map_error(e, Some(key)))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| map_error(e, Some(key)))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(body.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        // PutObject replaces the whole object or nothing
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_error(e, None))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds on missing keys
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| map_error(e, None))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_error(e, None))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| self.store_key(key).to_string()),
            );
        }
        keys.sort();
        Ok(keys)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn start_copy(&self, from: &str, to: &str) -> StorageResult<CopyStatus> {
        let result = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(self.full_key(to))
            .copy_source(self.copy_source(from))
            .send()
            .await;

        match result {
            Ok(_) => Ok(CopyStatus::Success),
            Err(err) if is_not_found(&err) => Err(StorageError::NotFound(from.to_string())),
            Err(aws_sdk_s3::error::SdkError::ServiceError(service_err)) => {
                let status = service_err.raw().status().as_u16();
                Ok(CopyStatus::Failed(format!(
                    "CopyObject rejected with HTTP {status}: {}",
                    service_err.err()
                )))
            }
            Err(err) => Err(map_error(err, None)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy_status(&self, key: &str) -> StorageResult<CopyStatus> {
        if self.exists(key).await? {
            Ok(CopyStatus::Success)
        } else {
            Ok(CopyStatus::Failed(format!("copy target {key} does not exist")))
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    /// Write and remove a marker object; the worker needs write access.
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let probe = async {
            self.put(HEALTH_CHECK_KEY, Bytes::from_static(b"ok")).await?;
            match self.delete(HEALTH_CHECK_KEY).await {
                Err(StorageError::NotFound(_)) => Ok(()),
                other => other,
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("S3 health check timed out after {HEALTH_CHECK_TIMEOUT:?}"),
                ))
            })?
    }
}
