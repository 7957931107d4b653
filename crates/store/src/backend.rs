use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use crate::access::Access;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::project::{DownloadOptions, IpSummary, ListObjectsOptions, Object};

/// Streaming object bytes handed back by a download.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming listing results.
pub type ObjectStream = BoxStream<'static, Result<Object>>;

/// Read-side operations against an opened project.
///
/// Implementations are shared behind an [`Arc`] for the lifetime of a
/// request; `close` is called exactly once from the owning [`Project`].
///
/// [`Project`]: crate::Project
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Fetch the metadata of a single object.
    async fn stat_object(&self, bucket: &str, key: &str) -> Result<Object>;

    /// Open a ranged read of an object's bytes.
    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        options: DownloadOptions,
    ) -> Result<ByteReader>;

    /// List objects under a prefix, rolling deeper segments up into prefix
    /// entries unless the listing is recursive.
    fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> ObjectStream;

    /// Report the storage-node addresses holding pieces of an object.
    async fn object_ip_summary(&self, bucket: &str, key: &str) -> Result<IpSummary>;

    /// Release the backend's resources.
    async fn close(&self) -> Result<()>;
}

/// Opens backends for access grants.
///
/// The production implementation dials the storage network with the grant's
/// capability payload and draws connections from the process-wide pool
/// described by [`PoolConfig`].
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Open a backend authorized by `access`.
    async fn dial(&self, access: &Access, pool: &PoolConfig) -> Result<Arc<dyn Backend>>;
}
