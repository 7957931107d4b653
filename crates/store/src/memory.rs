//! In-memory store backend.
//!
//! Backs local development and the test suites: shares are registered up
//! front against a serialized access grant, then dialed exactly like the
//! production transport would be.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt;

use crate::access::{Access, GRANT_VERSION};
use crate::backend::{Backend, ByteReader, Dialer, ObjectStream};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::project::{DownloadOptions, IpSummary, ListObjectsOptions, Object, SystemMetadata};

/// Mint a serialized access grant whose payload is `label`.
///
/// The result parses with [`Access::parse`] and can be registered on a
/// [`MemoryDialer`].
pub fn grant(label: &str) -> String {
    bs58::encode(label.as_bytes())
        .with_check_version(GRANT_VERSION)
        .into_string()
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created: SystemTime,
    ip_ports: Vec<String>,
    piece_count: i64,
}

#[derive(Debug, Default)]
struct ShareState {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    list_denied: bool,
}

/// Dialer over process-local state, keyed by serialized access grant.
#[derive(Debug, Clone, Default)]
pub struct MemoryDialer {
    shares: Arc<Mutex<HashMap<String, ShareState>>>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty bucket under the given access.
    pub fn create_bucket(&self, access: &str, bucket: &str) {
        let mut shares = self.shares.lock().unwrap();
        shares
            .entry(access.to_string())
            .or_default()
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object, creating the bucket if needed.
    pub fn upload(&self, access: &str, bucket: &str, key: &str, data: &[u8]) {
        let mut shares = self.shares.lock().unwrap();
        shares
            .entry(access.to_string())
            .or_default()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    created: SystemTime::now(),
                    ip_ports: Vec::new(),
                    piece_count: 0,
                },
            );
    }

    /// Attach a piece placement summary to a stored object.
    pub fn set_object_ips(
        &self,
        access: &str,
        bucket: &str,
        key: &str,
        ip_ports: &[&str],
        piece_count: i64,
    ) {
        let mut shares = self.shares.lock().unwrap();
        if let Some(object) = shares
            .get_mut(access)
            .and_then(|share| share.buckets.get_mut(bucket))
            .and_then(|objects| objects.get_mut(key))
        {
            object.ip_ports = ip_ports.iter().map(|ip| ip.to_string()).collect();
            object.piece_count = piece_count;
        }
    }

    /// Make listings under the given access fail with permission denied,
    /// the way a download-only share capability behaves.
    pub fn deny_listing(&self, access: &str) {
        let mut shares = self.shares.lock().unwrap();
        shares.entry(access.to_string()).or_default().list_denied = true;
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, access: &Access, _pool: &PoolConfig) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(MemoryBackend {
            shares: self.shares.clone(),
            access: access.serialized().to_string(),
        }))
    }
}

#[derive(Debug)]
struct MemoryBackend {
    shares: Arc<Mutex<HashMap<String, ShareState>>>,
    access: String,
}

impl MemoryBackend {
    fn with_bucket<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&BTreeMap<String, StoredObject>) -> Result<T>,
    ) -> Result<T> {
        let shares = self.shares.lock().unwrap();
        let objects = shares
            .get(&self.access)
            .and_then(|share| share.buckets.get(bucket))
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        f(objects)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn stat_object(&self, bucket: &str, key: &str) -> Result<Object> {
        self.with_bucket(bucket, |objects| {
            let stored = objects
                .get(key)
                .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
            Ok(Object {
                key: key.to_string(),
                is_prefix: false,
                system: SystemMetadata {
                    created: stored.created,
                    content_length: stored.data.len() as i64,
                },
            })
        })
    }

    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        options: DownloadOptions,
    ) -> Result<ByteReader> {
        self.with_bucket(bucket, |objects| {
            let stored = objects
                .get(key)
                .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
            let start = (options.offset.max(0) as usize).min(stored.data.len());
            let end = if options.length < 0 {
                stored.data.len()
            } else {
                (start + options.length as usize).min(stored.data.len())
            };
            let reader: ByteReader = Box::new(Cursor::new(stored.data[start..end].to_vec()));
            Ok(reader)
        })
    }

    fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> ObjectStream {
        let entries = self.with_bucket(bucket, |objects| {
            let mut entries = Vec::new();
            let mut last_prefix: Option<String> = None;
            for (key, stored) in objects.range(options.prefix.clone()..) {
                if !key.starts_with(&options.prefix) {
                    break;
                }
                let suffix = &key[options.prefix.len()..];
                match suffix.find('/') {
                    Some(slash) if !options.recursive => {
                        let entry = format!("{}{}", options.prefix, &suffix[..=slash]);
                        if last_prefix.as_deref() == Some(entry.as_str()) {
                            continue;
                        }
                        last_prefix = Some(entry.clone());
                        entries.push(Object {
                            key: entry,
                            is_prefix: true,
                            system: SystemMetadata {
                                created: stored.created,
                                content_length: 0,
                            },
                        });
                    }
                    _ => entries.push(Object {
                        key: key.clone(),
                        is_prefix: false,
                        system: SystemMetadata {
                            created: stored.created,
                            content_length: stored.data.len() as i64,
                        },
                    }),
                }
            }
            Ok(entries)
        });

        let denied = {
            let shares = self.shares.lock().unwrap();
            shares
                .get(&self.access)
                .map(|share| share.list_denied)
                .unwrap_or(false)
        };

        match (denied, entries) {
            (true, _) => futures::stream::iter(vec![Err(Error::PermissionDenied)]).boxed(),
            (false, Ok(entries)) => futures::stream::iter(entries.into_iter().map(Ok)).boxed(),
            (false, Err(err)) => futures::stream::iter(vec![Err(err)]).boxed(),
        }
    }

    async fn object_ip_summary(&self, bucket: &str, key: &str) -> Result<IpSummary> {
        self.with_bucket(bucket, |objects| {
            let stored = objects
                .get(key)
                .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
            Ok(IpSummary {
                ip_ports: stored.ip_ports.clone(),
                piece_count: stored.piece_count,
            })
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
