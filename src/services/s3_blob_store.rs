//! S3-compatible blob backend (MinIO, AWS S3) built on `object_store`.
//!
//! Puts use `PutMode::Create` so an existing key is reported instead of being
//! replaced. User metadata travels as `x-amz-meta-*` attributes. Bucket checks
//! and creation are not part of the `ObjectStore` API and are issued as signed
//! path-style requests against the endpoint.

use super::blob_store::{
    BlobAttributes, BlobError, BlobResult, BlobStore, StoredBlob, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
    aws::{AmazonS3Builder, AwsAuthorizer, AwsCredential, S3ConditionalPut},
    path::Path as ObjectPath,
};
use reqwest::{Method, StatusCode};
use std::{borrow::Cow, fmt, sync::Arc};
use tracing::{debug, info};

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Config {
    /// Endpoint, with or without scheme (e.g. `minio:9000`, `http://minio:9000`).
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Use TLS when talking to the endpoint.
    pub secure: bool,
    pub bucket: String,
    pub region: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("secure", &self.secure)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

impl S3Config {
    /// Endpoint URL with the scheme dictated by `secure`.
    pub fn endpoint_url(&self) -> String {
        let host = self
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{host}")
    }
}

/// Signed bucket-level access alongside the object API.
struct BucketAdmin {
    http: reqwest::Client,
    bucket_url: String,
    access_key: String,
    secret_key: String,
    region: String,
}

pub struct S3BlobStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    admin: Option<BucketAdmin>,
}

impl S3BlobStore {
    /// Build a client for the configured endpoint. No network traffic happens here.
    pub fn new(config: &S3Config) -> BlobResult<Self> {
        let endpoint = config.endpoint_url();
        info!(
            "Initializing S3 blob storage (endpoint: {}, bucket: {})",
            endpoint, config.bucket
        );

        let store = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_allow_http(!config.secure)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_virtual_hosted_style_request(false)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .build()
            .map_err(|err| BlobError::Backend(format!("failed to build S3 client: {err}")))?;

        let admin = BucketAdmin {
            http: reqwest::Client::new(),
            bucket_url: format!("{}/{}", endpoint, config.bucket),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
        };

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
            admin: Some(admin),
        })
    }

    /// Wrap an existing `ObjectStore`; bucket management becomes a no-op.
    pub fn with_object_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            admin: None,
        }
    }

    fn path(key: &str) -> BlobResult<ObjectPath> {
        ensure_key_safe(key)?;
        ObjectPath::parse(key).map_err(|_| BlobError::InvalidKey(key.to_string()))
    }

    fn to_attributes(attributes: BlobAttributes) -> Attributes {
        let mut out = Attributes::new();
        if let Some(content_type) = attributes.content_type {
            out.insert(Attribute::ContentType, AttributeValue::from(content_type));
        }
        for (name, value) in attributes.metadata {
            out.insert(Attribute::Metadata(Cow::Owned(name)), AttributeValue::from(value));
        }
        out
    }

    fn from_attributes(attributes: &Attributes) -> BlobAttributes {
        let mut out = BlobAttributes::default();
        for (attribute, value) in attributes.iter() {
            let value = AsRef::<str>::as_ref(value).to_string();
            match attribute {
                Attribute::ContentType => out.content_type = Some(value),
                Attribute::Metadata(name) => {
                    out.metadata.insert(name.to_string(), value);
                }
                _ => {}
            }
        }
        out
    }
}

impl BucketAdmin {
    async fn send(&self, method: Method) -> BlobResult<StatusCode> {
        let mut request = self
            .http
            .request(method, &self.bucket_url)
            .build()
            .map_err(|err| BlobError::Backend(format!("building bucket request: {err}")))?;
        let credential = AwsCredential {
            key_id: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            token: None,
        };
        AwsAuthorizer::new(&credential, "s3", &self.region).authorize(&mut request, None);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| BlobError::Unreachable(err.to_string()))?;
        Ok(response.status())
    }
}

fn map_store_error(key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            BlobError::AlreadyExists(key.to_string())
        }
        other => BlobError::Backend(other.to_string()),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Bytes, attributes: BlobAttributes) -> BlobResult<()> {
        let path = Self::path(key)?;
        let size = bytes.len();
        let opts = PutOptions {
            mode: PutMode::Create,
            attributes: Self::to_attributes(attributes),
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await
            .map_err(|err| map_store_error(key, err))?;
        debug!(key, size, bucket = %self.bucket, "stored blob in S3");
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<StoredBlob> {
        let path = Self::path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|err| map_store_error(key, err))?;
        let attributes = Self::from_attributes(&result.attributes);
        let bytes = result
            .bytes()
            .await
            .map_err(|err| map_store_error(key, err))?;
        Ok(StoredBlob { bytes, attributes })
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let path = Self::path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(map_store_error(key, err)),
        }
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = Self::path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(map_store_error(key, err)),
        }
    }

    async fn ensure_bucket(&self) -> BlobResult<()> {
        let Some(admin) = &self.admin else {
            return Ok(());
        };
        let status = admin.send(Method::HEAD).await?;
        if status.is_success() {
            info!("S3 bucket '{}' already exists.", self.bucket);
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(BlobError::Backend(format!(
                "checking bucket '{}' returned {}",
                self.bucket, status
            )));
        }

        let status = admin.send(Method::PUT).await?;
        if status.is_success() {
            info!("S3 bucket '{}' created.", self.bucket);
            Ok(())
        } else {
            Err(BlobError::Backend(format!(
                "creating bucket '{}' returned {}",
                self.bucket, status
            )))
        }
    }

    async fn ping(&self) -> BlobResult<()> {
        self.store
            .list_with_delimiter(None)
            .await
            .map(|_| ())
            .map_err(|err| BlobError::Unreachable(err.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blob_store::{META_CHECKSUM, META_ORIGINAL_FILENAME};
    use object_store::memory::InMemory;

    fn memory_store() -> S3BlobStore {
        S3BlobStore::with_object_store(Arc::new(InMemory::new()), "recipe-binaries")
    }

    #[test]
    fn endpoint_scheme_follows_tls_flag() {
        let mut config = S3Config {
            endpoint: "http://minio:9000/".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            secure: false,
            bucket: "recipe-binaries".into(),
            region: "us-east-1".into(),
        };
        assert_eq!(config.endpoint_url(), "http://minio:9000");
        config.secure = true;
        assert_eq!(config.endpoint_url(), "https://minio:9000");
        config.endpoint = "minio:9000".into();
        assert_eq!(config.endpoint_url(), "https://minio:9000");
        assert!(format!("{config:?}").contains("<redacted>"));
    }

    #[tokio::test]
    async fn put_get_exists_delete() {
        let store = memory_store();
        let key = "camera_config/20240101000000_cam.yaml";
        let attrs = BlobAttributes::for_component(Some("text/yaml".into()), &"f".repeat(64), "cam.yaml");

        store.put(key, Bytes::from_static(b"exposure: 3"), attrs).await.unwrap();
        assert!(store.exists(key).await.unwrap());

        let blob = store.get(key).await.unwrap();
        assert_eq!(&blob.bytes[..], b"exposure: 3");
        assert_eq!(blob.content_type(), "text/yaml");
        assert_eq!(blob.attributes.metadata[META_CHECKSUM], "f".repeat(64));
        assert_eq!(blob.attributes.metadata[META_ORIGINAL_FILENAME], "cam.yaml");

        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn create_mode_reports_existing_key() {
        let store = memory_store();
        let key = "fw/20240101000000_a.bin";
        store.put(key, Bytes::from_static(b"1"), BlobAttributes::default()).await.unwrap();
        let err = store
            .put(key, Bytes::from_static(b"2"), BlobAttributes::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn bucket_management_is_noop_without_endpoint() {
        let store = memory_store();
        store.ensure_bucket().await.unwrap();
        store.ping().await.unwrap();
    }
}
