//! Discovery and caching of per-host credentials for custom-domain
//! hosting.
//!
//! Operators delegate a host to the gateway by publishing TXT records under
//! `txt-<host>`: `storj_root:<bucket>[/<prefix>]` names what to serve, and
//! one or more `storj_grant-<n>:<chunk>` records carry the serialized
//! access grant, split to fit record length limits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use linkgate_store::Access;
use moka::future::Cache;
use moka::Expiry;

use crate::access::parse_grant;
use crate::dns::TxtResolver;
use crate::error::Error;

const CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct TxtRecord {
    access: Access,
    root: String,
    /// `min(dns_ttl, configured max)`, fixed when the record is fetched.
    ttl: Duration,
}

/// Expire each cached record at its own DNS-derived TTL.
struct RecordExpiry;

impl Expiry<String, TxtRecord> for RecordExpiry {
    fn expire_after_create(
        &self,
        _host: &String,
        record: &TxtRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(record.ttl)
    }
}

/// TTL-bounded cache of host → (access, root), refreshed from DNS.
pub(crate) struct TxtRecords {
    max_ttl: Duration,
    prefix: String,
    resolver: Box<dyn TxtResolver>,
    cache: Cache<String, TxtRecord>,
}

impl TxtRecords {
    pub fn new(max_ttl: Duration, prefix: String, resolver: Box<dyn TxtResolver>) -> Self {
        Self {
            max_ttl,
            prefix,
            resolver,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .expire_after(RecordExpiry)
                .build(),
        }
    }

    /// The access grant and root path serving `host`, from the cache or a
    /// fresh DNS round-trip.
    ///
    /// Concurrent misses for the same host coalesce into a single lookup.
    pub async fn fetch_access(&self, host: &str) -> Result<(Access, String), Error> {
        let record = self
            .cache
            .try_get_with(host.to_string(), self.lookup(host))
            .await
            .map_err(|err: Arc<Error>| Error::from_shared(&err))?;
        Ok((record.access, record.root))
    }

    async fn lookup(&self, host: &str) -> Result<TxtRecord, Error> {
        let lookup = self
            .resolver
            .lookup_txt(&format!("{}{}", self.prefix, host))
            .await?;
        let parsed = parse_records(&lookup.records)?;
        let access = parse_grant(&parsed.serialized_access)
            .map_err(|err| err.with_action("parse txt access"))?;
        Ok(TxtRecord {
            access,
            root: parsed.root,
            ttl: lookup.ttl.min(self.max_ttl),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ParsedRecords {
    pub serialized_access: String,
    pub root: String,
}

/// Assemble the access grant and root path out of a host's TXT record set.
///
/// Canonical records are `storj_grant-<n>:<chunk>` (1-indexed, contiguous,
/// concatenated in order) and `storj_root:<path>`. The single-record
/// spellings `storj-access`/`storj-grant` and `storj-path` are accepted for
/// back compatibility. Unrelated records are ignored.
pub(crate) fn parse_records(records: &[String]) -> Result<ParsedRecords, Error> {
    let mut grants: HashMap<usize, &str> = HashMap::new();
    let mut root = "";
    let mut legacy_access = "";
    let mut legacy_root = "";

    for record in records {
        let Some((name, value)) = record.split_once(':') else {
            continue;
        };
        if let Some(index) = name.strip_prefix("storj_grant-") {
            let index: usize = index.parse().map_err(|_| {
                Error::msg(format!("invalid grant record: {name}"))
                    .with_status(StatusCode::BAD_REQUEST)
            })?;
            grants.insert(index, value);
        } else {
            match name {
                "storj_root" => root = value,
                "storj-access" | "storj-grant" => legacy_access = value,
                "storj-path" => legacy_root = value,
                _ => {}
            }
        }
    }

    if root.is_empty() {
        root = legacy_root;
    }
    if root.is_empty() {
        return Err(
            Error::msg("missing root path in txt record").with_status(StatusCode::BAD_REQUEST)
        );
    }

    let serialized_access = if grants.is_empty() {
        if legacy_access.is_empty() {
            return Err(Error::msg("missing grants").with_status(StatusCode::BAD_REQUEST));
        }
        legacy_access.to_string()
    } else {
        let mut serialized = String::new();
        for index in 1..=grants.len() {
            let chunk = grants.get(&index).copied().unwrap_or("");
            if chunk.is_empty() {
                return Err(Error::msg("missing grants").with_status(StatusCode::BAD_REQUEST));
            }
            serialized.push_str(chunk);
        }
        serialized
    };

    Ok(ParsedRecords {
        serialized_access,
        root: root.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::dns::TxtLookup;
    use linkgate_store::memory;

    fn records(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn chunks_concatenate_in_index_order() {
        let parsed = parse_records(&records(&[
            "storj_grant-2:E",
            "storj_root:rk",
            "storj_grant-1:F",
        ]))
        .unwrap();
        assert_eq!(parsed.serialized_access, "FE");
        assert_eq!(parsed.root, "rk");
    }

    #[test]
    fn gap_in_grant_indices_is_rejected() {
        let err = parse_records(&records(&[
            "storj_grant-1:F",
            "storj_grant-3:X",
            "storj_root:rk",
        ]))
        .unwrap_err();
        assert_eq!(err.status(StatusCode::OK), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_chunk_is_rejected() {
        let err = parse_records(&records(&[
            "storj_grant-1:F",
            "storj_grant-2:",
            "storj_root:rk",
        ]))
        .unwrap_err();
        assert_eq!(err.status(StatusCode::OK), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_root_is_rejected() {
        let err = parse_records(&records(&["storj_grant-1:F"])).unwrap_err();
        assert_eq!(err.to_string(), "missing root path in txt record");
    }

    #[test]
    fn unrelated_records_are_ignored() {
        let parsed = parse_records(&records(&[
            "v=spf1 include:example.test ~all",
            "storj_grant-1:F",
            "storj_root:bucket/site",
        ]))
        .unwrap();
        assert_eq!(parsed.serialized_access, "F");
        assert_eq!(parsed.root, "bucket/site");
    }

    #[test]
    fn legacy_single_record_spelling_is_accepted() {
        let parsed = parse_records(&records(&[
            "storj-access:SERIALIZED",
            "storj-path:bucket/legacy",
        ]))
        .unwrap();
        assert_eq!(parsed.serialized_access, "SERIALIZED");
        assert_eq!(parsed.root, "bucket/legacy");
    }

    #[test]
    fn canonical_records_win_over_legacy() {
        let parsed = parse_records(&records(&[
            "storj-access:OLD",
            "storj-path:bucket/old",
            "storj_grant-1:NEW",
            "storj_root:bucket/new",
        ]))
        .unwrap();
        assert_eq!(parsed.serialized_access, "NEW");
        assert_eq!(parsed.root, "bucket/new");
    }

    #[derive(Debug)]
    struct FakeResolver {
        grant: String,
        ttl: Duration,
        lookups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TxtResolver for FakeResolver {
        async fn lookup_txt(&self, name: &str) -> Result<TxtLookup, Error> {
            assert!(name.starts_with("txt-"), "expected delegated name, got {name}");
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(TxtLookup {
                records: records(&[
                    &format!("storj_grant-1:{}", &self.grant[..self.grant.len() / 2]),
                    &format!("storj_grant-2:{}", &self.grant[self.grant.len() / 2..]),
                    "storj_root:bucket/site",
                ]),
                ttl: self.ttl,
            })
        }
    }

    fn cache_with(ttl: Duration, max_ttl: Duration) -> (TxtRecords, Arc<AtomicUsize>, String) {
        let grant = memory::grant("hosting share");
        let lookups = Arc::new(AtomicUsize::new(0));
        let cache = TxtRecords::new(
            max_ttl,
            "txt-".to_string(),
            Box::new(FakeResolver {
                grant: grant.clone(),
                ttl,
                lookups: lookups.clone(),
            }),
        );
        (cache, lookups, grant)
    }

    #[tokio::test]
    async fn fetched_records_round_trip_the_access_parser() {
        let (cache, _, grant) = cache_with(Duration::from_secs(300), Duration::from_secs(3600));
        let (access, root) = cache.fetch_access("example.test").await.unwrap();
        assert_eq!(access.serialized(), grant);
        assert_eq!(root, "bucket/site");
    }

    #[tokio::test]
    async fn fresh_entries_skip_dns() {
        let (cache, lookups, _) = cache_with(Duration::from_secs(300), Duration::from_secs(3600));
        cache.fetch_access("example.test").await.unwrap();
        cache.fetch_access("example.test").await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_treated_as_absent() {
        let (cache, lookups, _) = cache_with(Duration::ZERO, Duration::from_secs(3600));
        cache.fetch_access("example.test").await.unwrap();
        cache.fetch_access("example.test").await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expiry_is_capped_by_the_configured_maximum() {
        // DNS says an hour, config says zero: the entry must not be served
        // from cache.
        let (cache, lookups, _) = cache_with(Duration::from_secs(3600), Duration::ZERO);
        cache.fetch_access("example.test").await.unwrap();
        cache.fetch_access("example.test").await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce() {
        let (cache, lookups, _) = cache_with(Duration::from_secs(300), Duration::from_secs(3600));
        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.fetch_access("example.test").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookups_surface_their_status() {
        #[derive(Debug)]
        struct EmptyResolver;

        #[async_trait]
        impl TxtResolver for EmptyResolver {
            async fn lookup_txt(&self, _name: &str) -> Result<TxtLookup, Error> {
                Ok(TxtLookup {
                    records: Vec::new(),
                    ttl: Duration::from_secs(300),
                })
            }
        }

        let cache = TxtRecords::new(
            Duration::from_secs(3600),
            "txt-".to_string(),
            Box::new(EmptyResolver),
        );
        let err = cache.fetch_access("example.test").await.unwrap_err();
        assert_eq!(err.status(StatusCode::OK), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "missing root path in txt record");
    }
}
