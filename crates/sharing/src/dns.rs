//! TXT record resolution.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{
    NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use http::StatusCode;

use crate::error::Error;

/// A host's TXT record set plus the shortest TTL the response carried.
#[derive(Debug, Clone)]
pub struct TxtLookup {
    pub records: Vec<String>,
    pub ttl: Duration,
}

/// Resolves TXT records for a name.
#[async_trait]
pub trait TxtResolver: Send + Sync + fmt::Debug {
    async fn lookup_txt(&self, name: &str) -> Result<TxtLookup, Error>;
}

/// [`TxtResolver`] backed by a real DNS resolver, optionally pointed at an
/// explicit server (e.g. `1.1.1.1:53`).
pub struct DnsClient {
    resolver: TokioAsyncResolver,
}

impl fmt::Debug for DnsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsClient").finish_non_exhaustive()
    }
}

impl DnsClient {
    pub fn new(dns_server: Option<&str>) -> Result<Self, Error> {
        let resolver = match dns_server {
            Some(address) => {
                let address: SocketAddr = address
                    .parse()
                    .map_err(|err| Error::msg(format!("invalid DNS server address: {err}")))?;
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(address, Protocol::Udp));
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|err| Error::msg(format!("resolver setup: {err}")))?,
        };
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtResolver for DnsClient {
    async fn lookup_txt(&self, name: &str) -> Result<TxtLookup, Error> {
        let lookup = self.resolver.txt_lookup(name.to_string()).await.map_err(|err| {
            let status = match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Error::msg(format!("TXT lookup for {name}: {err}"))
                .with_action("dns lookup")
                .with_status(status)
        })?;

        let ttl = lookup
            .as_lookup()
            .record_iter()
            .map(|record| record.ttl())
            .min()
            .unwrap_or(0);

        let records = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect();

        Ok(TxtLookup {
            records,
            ttl: Duration::from_secs(u64::from(ttl)),
        })
    }
}
