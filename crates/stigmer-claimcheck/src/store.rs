// Object-store backends.
//
// Decision: Use enum dispatch for simplicity over trait objects
//
// Keys are opaque UUIDs minted on Put. The filesystem backend keeps one
// file per key under a base directory; the S3-compatible backend talks to
// a configured bucket with path-style addressing (Cloudflare R2).

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClaimCheckError {
    #[error("object store error: {0}")]
    Store(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Connection settings for the S3-compatible backend.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// In-memory backend (tests and dev mode).
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

/// One file per key under a base directory.
pub struct FsObjectStore {
    base_dir: PathBuf,
}

/// S3-compatible bucket (Cloudflare R2).
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

pub enum ObjectStore {
    Memory(MemoryObjectStore),
    Fs(FsObjectStore),
    S3(S3ObjectStore),
}

impl ObjectStore {
    pub fn in_memory() -> Self {
        Self::Memory(MemoryObjectStore::default())
    }

    pub fn filesystem(base_dir: impl Into<PathBuf>) -> Self {
        Self::Fs(FsObjectStore {
            base_dir: base_dir.into(),
        })
    }

    pub fn s3(config: S3Config) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "stigmer-claimcheck",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region))
            .endpoint_url(config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self::S3(S3ObjectStore {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
        })
    }

    /// Store bytes under a freshly minted key and return it.
    pub async fn put(&self, data: Vec<u8>) -> Result<String, ClaimCheckError> {
        let key = Uuid::now_v7().to_string();
        match self {
            Self::Memory(store) => {
                store.objects.write().insert(key.clone(), data);
            }
            Self::Fs(store) => {
                tokio::fs::create_dir_all(&store.base_dir)
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                tokio::fs::write(store.base_dir.join(&key), data)
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
            }
            Self::S3(store) => {
                store
                    .client
                    .put_object()
                    .bucket(&store.bucket)
                    .key(&key)
                    .body(aws_sdk_s3::primitives::ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
            }
        }
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ClaimCheckError> {
        match self {
            Self::Memory(store) => store
                .objects
                .read()
                .get(key)
                .cloned()
                .ok_or_else(|| ClaimCheckError::NotFound(key.to_string())),
            Self::Fs(store) => match tokio::fs::read(store.base_dir.join(key)).await {
                Ok(data) => Ok(data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ClaimCheckError::NotFound(key.to_string()))
                }
                Err(e) => Err(ClaimCheckError::Store(e.to_string())),
            },
            Self::S3(store) => {
                let output = store
                    .client
                    .get_object()
                    .bucket(&store.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                Ok(bytes.into_bytes().to_vec())
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), ClaimCheckError> {
        match self {
            Self::Memory(store) => {
                store.objects.write().remove(key);
                Ok(())
            }
            Self::Fs(store) => match tokio::fs::remove_file(store.base_dir.join(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ClaimCheckError::Store(e.to_string())),
            },
            Self::S3(store) => {
                store
                    .client
                    .delete_object()
                    .bucket(&store.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                Ok(())
            }
        }
    }

    pub async fn health(&self) -> Result<(), ClaimCheckError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Fs(store) => tokio::fs::create_dir_all(&store.base_dir)
                .await
                .map_err(|e| ClaimCheckError::Store(e.to_string())),
            Self::S3(store) => {
                store
                    .client
                    .head_bucket()
                    .bucket(&store.bucket)
                    .send()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                Ok(())
            }
        }
    }

    pub async fn list_keys(&self) -> Result<Vec<String>, ClaimCheckError> {
        match self {
            Self::Memory(store) => Ok(store.objects.read().keys().cloned().collect()),
            Self::Fs(store) => {
                let mut keys = Vec::new();
                let mut entries = match tokio::fs::read_dir(&store.base_dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
                    Err(e) => return Err(ClaimCheckError::Store(e.to_string())),
                };
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?
                {
                    keys.push(entry.file_name().to_string_lossy().into_owned());
                }
                Ok(keys)
            }
            Self::S3(store) => {
                let output = store
                    .client
                    .list_objects_v2()
                    .bucket(&store.bucket)
                    .send()
                    .await
                    .map_err(|e| ClaimCheckError::Store(e.to_string()))?;
                Ok(output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string))
                    .collect())
            }
        }
    }
}
