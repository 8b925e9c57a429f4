//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UfsError};
use crate::local::LocalFileSystem;
use crate::object::ObjectFileSystem;
use crate::ufs::UnderFileSystem;

/// Which backend the mount fronts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UfsConfig {
    /// In-memory object storage (for testing)
    #[default]
    Memory,

    /// A directory on a locally mounted filesystem
    Local {
        /// Root directory of the backend
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

impl UfsConfig {
    /// Connect to the configured backend.
    pub async fn build(&self) -> Result<Arc<dyn UnderFileSystem>> {
        match self {
            UfsConfig::Memory => Ok(Arc::new(ObjectFileSystem::new(
                "memory",
                Arc::new(InMemory::new()),
            ))),

            UfsConfig::Local { path } => Ok(Arc::new(LocalFileSystem::new(path).await?)),

            UfsConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let store = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"))
                    .build()
                    .map_err(|e| UfsError::InvalidConfig(e.to_string()))?;
                let store: Arc<dyn ObjectStore> = Arc::new(store);

                // fail fast when the bucket is missing
                {
                    use futures::TryStreamExt;
                    let prefix = ObjectPath::from("");
                    let mut stream = store.list(Some(&prefix));
                    match stream.try_next().await {
                        Ok(_) => {}
                        Err(object_store::Error::NotFound { .. }) => {
                            return Err(UfsError::InvalidConfig(format!(
                                "bucket not found: {}",
                                bucket
                            )));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                tracing::info!(endpoint = %endpoint, bucket = %bucket, "connected to s3 backend");
                Ok(Arc::new(ObjectFileSystem::new("s3", store)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        backend: UfsConfig,
    }

    #[test]
    fn test_parse_tagged_config() {
        let parsed: Wrapper = toml::from_str(
            r#"
            [backend]
            type = "local"
            path = "/srv/data"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.backend,
            UfsConfig::Local {
                path: PathBuf::from("/srv/data")
            }
        );

        let parsed: Wrapper = toml::from_str(
            r#"
            [backend]
            type = "s3"
            endpoint = "http://localhost:9000"
            access_key = "minioadmin"
            secret_key = "minioadmin"
            bucket = "flowfs"
            "#,
        )
        .unwrap();
        assert!(matches!(parsed.backend, UfsConfig::S3 { region: None, .. }));
    }

    #[tokio::test]
    async fn test_build_local_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("backend");
        let config = UfsConfig::Local { path: root.clone() };

        let ufs = config.build().await.unwrap();
        assert_eq!(ufs.name(), "local");
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_build_memory() {
        let ufs = UfsConfig::default().build().await.unwrap();
        assert_eq!(ufs.name(), "memory");
        assert!(ufs.get_attr("/").await.unwrap().is_dir);
    }
}
