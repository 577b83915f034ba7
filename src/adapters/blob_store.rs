//! Object storage backends built on the `object_store` crate.
//!
//! Two backends share the upload path:
//! - `LocalBlobStore`: buckets are directories under a root (file:// URIs)
//! - `S3BlobStore`: Amazon S3 or an S3-compatible endpoint (s3:// URIs)
//!
//! Keys go through `object_store::path::Path`, which percent-encodes
//! reserved characters; returned URIs always name the encoded key that was
//! actually written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::{BlobStore, StoreError};

/// Bytes sent per multipart part (S3 requires at least 5 MiB for all but the last)
const PART_SIZE: u64 = 8 * 1024 * 1024;

/// Stream a local file to `location` as a multipart upload
async fn put_file(
    store: &dyn ObjectStore,
    local_path: &Path,
    location: &StorePath,
) -> Result<u64, StoreError> {
    let mut file = tokio::fs::File::open(local_path).await?;
    let mut upload = store.put_multipart(location).await?;
    let mut total_bytes: u64 = 0;

    loop {
        let mut part = Vec::with_capacity(PART_SIZE as usize);
        let read = match (&mut file).take(PART_SIZE).read_to_end(&mut part).await {
            Ok(read) => read,
            Err(e) => {
                let _ = upload.abort().await;
                return Err(e.into());
            }
        };
        if read == 0 {
            break;
        }

        total_bytes += read as u64;
        if let Err(e) = upload.put_part(PutPayload::from(part)).await {
            let _ = upload.abort().await;
            return Err(e.into());
        }
    }

    upload.complete().await?;
    Ok(total_bytes)
}

/// Reject names that would escape the bucket namespace
fn validate_bucket(bucket: &str) -> Result<(), StoreError> {
    let valid = !bucket.is_empty()
        && bucket != "."
        && bucket != ".."
        && !bucket.contains(['/', '\\']);

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidBucket(bucket.to_string()))
    }
}

/// Filesystem-backed store; each bucket is a directory under `root`
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the store, creating `root` if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Where `LocalFileSystem` puts `key` on disk
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let location = StorePath::from(key);
        let mut path = self.bucket_dir(bucket);
        path.extend(location.parts().map(|part| part.as_ref().to_string()));
        path
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        validate_bucket(bucket)?;
        let dir = self.bucket_dir(bucket);

        if !dir.exists() {
            info!(bucket, path = %dir.display(), "Creating bucket");
            tokio::fs::create_dir_all(&dir).await?;
        }

        Ok(())
    }

    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String, StoreError> {
        validate_bucket(bucket)?;
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            return Err(StoreError::BucketMissing(bucket.to_string()));
        }

        let store = LocalFileSystem::new_with_prefix(&dir)?;
        let size = put_file(&store, local_path, &StorePath::from(key)).await?;
        debug!(bucket, key, size, "Uploaded object");

        Ok(self.public_url(bucket, key))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("file://{}", self.object_path(bucket, key).display())
    }
}

/// Amazon S3 (or S3-compatible) store.
///
/// Objects go through `object_store`; bucket management uses the AWS SDK,
/// since the object API cannot create buckets. Credentials come from the
/// standard AWS environment unless set explicitly.
pub struct S3BlobStore {
    region: String,

    /// Custom endpoint for S3-compatible services (path-style addressing)
    endpoint: Option<String>,

    /// Static access key id and secret
    credentials: Option<(String, String)>,
}

impl S3BlobStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            credentials: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some((access_key_id.into(), secret_access_key.into()));
        self
    }

    fn client(&self, bucket: &str) -> Result<impl ObjectStore, StoreError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.region);

        if let Some(ref endpoint) = self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some((ref key, ref secret)) = self.credentials {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }

        Ok(builder.build()?)
    }

    async fn admin_client(&self) -> aws_sdk_s3::Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));

        if let Some(ref endpoint) = self.endpoint {
            loader = loader.endpoint_url(endpoint.as_str());
        }
        if let Some((ref key, ref secret)) = self.credentials {
            loader = loader.credentials_provider(Credentials::new(
                key.as_str(),
                secret.as_str(),
                None,
                None,
                "vidscribe",
            ));
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.endpoint.is_some())
            .build();

        aws_sdk_s3::Client::from_conf(config)
    }

    /// Location constraint for CreateBucket; us-east-1 must send none
    fn location_constraint(&self) -> Option<CreateBucketConfiguration> {
        if self.region == "us-east-1" {
            return None;
        }

        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build(),
        )
    }
}

/// Split SDK failures into unreachable (transient) and refused
fn sdk_failure<E, R>(bucket: &str, err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unreachable(message)
        }
        _ => StoreError::BucketRejected {
            bucket: bucket.to_string(),
            message,
        },
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &str {
        "s3"
    }

    /// HeadBucket, then CreateBucket in the configured region if absent.
    ///
    /// A bucket this account already owns counts as created.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        validate_bucket(bucket)?;
        let client = self.admin_client().await;

        match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(SdkError::ServiceError(e))
                if e.err().is_not_found() || e.raw().status().as_u16() == 404 => {}
            Err(e) => return Err(sdk_failure(bucket, e)),
        }

        info!(bucket, region = %self.region, "Creating bucket");
        let created = client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.location_constraint())
            .send()
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(e)) if e.err().is_bucket_already_owned_by_you() => {
                debug!(bucket, "Bucket already owned by this account");
                Ok(())
            }
            Err(e) => Err(sdk_failure(bucket, e)),
        }
    }

    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String, StoreError> {
        validate_bucket(bucket)?;
        let store = self.client(bucket)?;
        let location = StorePath::from(key);
        let size = put_file(&store, local_path, &location).await?;
        debug!(bucket, key = %location, size, "Uploaded object");

        Ok(format!("s3://{}/{}", bucket, location))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        let location = StorePath::from(key);
        match self.endpoint {
            Some(ref endpoint) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, location)
            }
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, location),
        }
    }
}
