use std::sync::Arc;
use std::time::Duration;

use crate::access::Access;
use crate::backend::Dialer;
use crate::error::Result;
use crate::memory::MemoryDialer;
use crate::project::Project;

/// Sizing of the process-wide connection pool handed to the transport.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum total pooled connections.
    pub capacity: usize,
    /// Maximum pooled connections per destination.
    pub key_capacity: usize,
    /// How long an idle connection is kept before being dropped.
    pub idle_expiration: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            key_capacity: 5,
            idle_expiration: Duration::from_secs(120),
        }
    }
}

/// Store client configuration: the dialer plus the connection pool it draws
/// from. Built once at startup and shared by every request.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection pool sizing, installed into the transport at startup.
    pub pool: PoolConfig,
    dialer: Arc<dyn Dialer>,
}

impl Config {
    /// Configuration using the given dialer.
    pub fn new(dialer: Arc<dyn Dialer>, pool: PoolConfig) -> Self {
        Self { pool, dialer }
    }

    /// Open a project authorized by `access`.
    pub async fn open_project(&self, access: &Access) -> Result<Project> {
        let backend = self.dialer.dial(access, &self.pool).await?;
        Ok(Project::new(backend))
    }
}

impl Default for Config {
    /// In-memory store with default pool sizing.
    fn default() -> Self {
        Self::new(Arc::new(MemoryDialer::new()), PoolConfig::default())
    }
}
