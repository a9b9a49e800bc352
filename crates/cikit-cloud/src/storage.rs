//! Object storage for archived documents
//!
//! [`ArchiveStorage`] addresses objects by full URI (`gs://bucket/a/b.json`)
//! and maps them onto an [`ObjectStore`] rooted at `scheme://bucket`.

use std::sync::Arc;

use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("URI {uri} is outside storage root {root}")]
    OutsideRoot { uri: String, root: String },

    #[error("Invalid storage URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    #[error("Storage backend error: {0}")]
    Backend(#[source] object_store::Error),

    #[error("Failed to (de)serialize {uri}: {source}")]
    Serialization {
        uri: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<object_store::Error> for StorageError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Backend(other),
        }
    }
}

/// URI-addressed object store handle
///
/// Cheap to clone; clones share the underlying store.
#[derive(Debug, Clone)]
pub struct ArchiveStorage {
    store: Arc<dyn ObjectStore>,
    root: String,
}

impl ArchiveStorage {
    /// Wrap `store`, which serves every URI under `root`
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: normalize_root(root.into()),
        }
    }

    /// In-memory store serving URIs under `root`, e.g. `gs://archive-bucket`
    pub fn in_memory(root: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), root)
    }

    /// Build a store for the bucket or filesystem `uri` lives in.
    ///
    /// Supported schemes: `gs://bucket/...` (credentials from the
    /// `GOOGLE_*` environment), `file:///path/...` and `memory://name/...`.
    pub fn for_uri(uri: &str) -> Result<Self, StorageError> {
        let invalid = |message: String| StorageError::InvalidUri {
            uri: uri.to_string(),
            message,
        };
        let url = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;

        match url.scheme() {
            "gs" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| invalid("missing bucket name".to_string()))?;
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()?;
                tracing::debug!(bucket, "Using Google Cloud Storage");
                Ok(Self::new(Arc::new(store), format!("gs://{bucket}")))
            }
            "file" => Ok(Self::new(Arc::new(LocalFileSystem::new()), "file://")),
            "memory" => {
                let name = url.host_str().unwrap_or("archive");
                Ok(Self::in_memory(format!("memory://{name}")))
            }
            other => Err(invalid(format!("unsupported scheme '{other}'"))),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Object path of `uri` relative to the root
    pub fn object_path(&self, uri: &str) -> Result<Path, StorageError> {
        let outside = || StorageError::OutsideRoot {
            uri: uri.to_string(),
            root: self.root.clone(),
        };
        let rest = uri.strip_prefix(self.root.as_str()).ok_or_else(outside)?;
        if !(rest.is_empty() || rest.starts_with('/') || self.root.ends_with("://")) {
            return Err(outside());
        }
        Path::parse(rest.trim_matches('/')).map_err(|e| StorageError::InvalidUri {
            uri: uri.to_string(),
            message: e.to_string(),
        })
    }

    fn uri_of(&self, path: &Path) -> String {
        format!("{}/{}", self.root, path)
    }

    pub async fn write_bytes(&self, uri: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(uri)?;
        self.store.put(&path, bytes.into()).await?;
        tracing::debug!(uri, "Wrote object");
        Ok(())
    }

    /// Write `value` as pretty-printed JSON
    pub async fn write_json<T: Serialize>(&self, uri: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialization {
            uri: uri.to_string(),
            source,
        })?;
        self.write_bytes(uri, bytes).await
    }

    pub async fn read_bytes(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(uri)?;
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(uri.to_string()),
            other => StorageError::Backend(other),
        })?;
        Ok(result.bytes().await?.to_vec())
    }

    pub async fn read_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T, StorageError> {
        let bytes = self.read_bytes(uri).await?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Serialization {
            uri: uri.to_string(),
            source,
        })
    }

    pub async fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        let path = self.object_path(uri)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::Backend(e)),
        }
    }

    /// URIs of every object under `prefix`, sorted
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = self.object_path(prefix)?;
        let objects: Vec<_> = self.store.list(Some(&path)).try_collect().await?;
        let mut uris: Vec<String> = objects.iter().map(|meta| self.uri_of(&meta.location)).collect();
        uris.sort();
        Ok(uris)
    }
}

/// Drop trailing slashes, but never the ones of a bare `scheme://`
fn normalize_root(root: String) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.ends_with(':') {
        format!("{trimmed}//")
    } else {
        trimmed.to_string()
    }
}
