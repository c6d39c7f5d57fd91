//! S3 Object Store Implementation
//!
//! Production backend over the `object_store` crate (Arrow ecosystem),
//! supporting AWS S3 and S3-compatible services (MinIO, LocalStack) via a
//! custom endpoint.
//!
//! Log keys are flat `-`-delimited names, but the `object_store` client
//! evaluates prefixes on `/` segment boundaries only, so the
//! character-granular prefix filter and delimiter rollup happen
//! client-side. Listing cost stays bounded regardless: the scan starts at
//! the prefix itself via `list_with_offset` and stops at the first key
//! sorting past the prefix block (S3 and the in-memory backend both yield
//! keys in lexicographic order), so each call touches only the keys under
//! its prefix, never the whole bucket.

use crate::config::S3Config;
use crate::store::{group_by_delimiter, ListResult, ObjectStore};
use futures::{Stream, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreClient;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// S3-backed object store
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Arc<dyn ObjectStoreClient>,
    root: String,
}

impl S3ObjectStore {
    /// Build a client from config. Credentials come from the standard
    /// AWS environment variables.
    pub fn new(config: &S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let client = builder.build().map_err(|e| {
            IoError::new(ErrorKind::InvalidInput, format!("failed to build S3 client: {}", e))
        })?;
        Ok(S3ObjectStore {
            client: Arc::new(client),
            root: config.prefix.clone().unwrap_or_default(),
        })
    }

    /// Wrap an existing client (for tests against in-memory backends)
    pub fn from_client(client: Arc<dyn ObjectStoreClient>, root: String) -> Self {
        S3ObjectStore { client, root }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        if self.root.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.root, key))
        }
    }

    fn strip_root(&self, path: &ObjectPath) -> String {
        let s = path.to_string();
        if self.root.is_empty() {
            s
        } else {
            let with_slash = format!("{}/", self.root);
            s.strip_prefix(&with_slash).unwrap_or(&s).to_string()
        }
    }

    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }
}

/// Collect stripped keys from an offset-ordered listing until the first
/// key past the `prefix` block; everything after that point sorts outside
/// the prefix and is never polled.
async fn take_prefix_block<S, F>(
    stream: S,
    strip: F,
    prefix: &str,
) -> object_store::Result<Vec<String>>
where
    S: Stream<Item = object_store::Result<object_store::ObjectMeta>>,
    F: Fn(&ObjectPath) -> String,
{
    futures::pin_mut!(stream);
    let mut keys = Vec::new();
    while let Some(meta) = stream.try_next().await? {
        let key = strip(&meta.location);
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key);
    }
    Ok(keys)
}

impl ObjectStore for S3ObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<char>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let root = if self.root.is_empty() {
                None
            } else {
                Some(ObjectPath::from(self.root.as_str()))
            };
            let stream = if prefix.is_empty() {
                self.client.list(root.as_ref())
            } else {
                // skip everything sorting before the prefix block
                self.client
                    .list_with_offset(root.as_ref(), &self.full_path(prefix))
            };
            let keys = take_prefix_block(stream, |p| self.strip_root(p), prefix)
                .await
                .map_err(Self::map_error)?;
            Ok(group_by_delimiter(
                prefix,
                delimiter,
                keys.iter().map(String::as_str),
            ))
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let result = self.client.get(&path).await.map_err(Self::map_error)?;
            let bytes = result.bytes().await.map_err(Self::map_error)?;
            Ok(bytes.to_vec())
        })
    }
}
