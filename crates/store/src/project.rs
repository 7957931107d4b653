use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::{Backend, ByteReader, ObjectStream};
use crate::error::Result;

/// Metadata of a stored object or a rolled-up prefix entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Object key, relative to the bucket. Prefix entries end in `/`.
    pub key: String,
    /// True when this entry stands for a deeper group of keys rather than an
    /// object.
    pub is_prefix: bool,
    /// System-tracked metadata.
    pub system: SystemMetadata,
}

/// System-tracked object metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMetadata {
    /// Creation time of the object.
    pub created: SystemTime,
    /// Length of the object's content in bytes.
    pub content_length: i64,
}

/// Options for [`Project::list_objects`].
#[derive(Debug, Clone, Default)]
pub struct ListObjectsOptions {
    /// Only keys beginning with this prefix are returned. Must be empty or
    /// end in `/`.
    pub prefix: String,
    /// Return every key under the prefix instead of rolling deeper segments
    /// up into prefix entries.
    pub recursive: bool,
    /// Include system metadata with each entry.
    pub system: bool,
}

/// Options for [`Project::download_object`].
#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Byte offset to begin reading at.
    pub offset: i64,
    /// Number of bytes to read; negative reads to the end of the object.
    pub length: i64,
}

/// Addresses of the storage nodes holding pieces of an object.
#[derive(Debug, Clone, Default)]
pub struct IpSummary {
    /// `ip:port` (or `host:port`) of each node holding at least one piece.
    pub ip_ports: Vec<String>,
    /// Total number of pieces across all nodes; zero for objects inlined in
    /// metadata.
    pub piece_count: i64,
}

/// An opened, authenticated handle against the object store.
///
/// Valid for many operations; [`close`](Self::close) releases the
/// underlying connections.
#[derive(Debug, Clone)]
pub struct Project {
    backend: Arc<dyn Backend>,
}

impl Project {
    pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Fetch the metadata of a single object.
    pub async fn stat_object(&self, bucket: &str, key: &str) -> Result<Object> {
        self.backend.stat_object(bucket, key).await
    }

    /// Open a ranged read of an object's bytes.
    pub async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        options: DownloadOptions,
    ) -> Result<ByteReader> {
        self.backend.download_object(bucket, key, options).await
    }

    /// List objects under a prefix.
    pub fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> ObjectStream {
        self.backend.list_objects(bucket, options)
    }

    /// Report the storage-node addresses holding pieces of an object.
    pub async fn object_ip_summary(&self, bucket: &str, key: &str) -> Result<IpSummary> {
        self.backend.object_ip_summary(bucket, key).await
    }

    /// Release the project's resources.
    pub async fn close(self) -> Result<()> {
        self.backend.close().await
    }
}
