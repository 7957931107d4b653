//! Maps storage-node addresses to geographic coordinates.
//!
//! Lookups go through a [`Reader`] (the production implementation reads a
//! MaxMind database file) and are memoized per parsed IP under a mutex.

use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;

/// Errors raised while resolving an address to coordinates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IPv6 node addresses are not mapped.
    #[error("IPv6 addresses are ignored for now: {0}")]
    Ipv6Unsupported(String),

    /// The address is neither an IP nor a resolvable host name.
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    /// The geolocation database rejected the lookup.
    #[error("geolocation database error: {0}")]
    Db(#[from] maxminddb::MaxMindDBError),

    /// The database has no location for this IP.
    #[error("no location for IP: {0}")]
    NoLocation(IpAddr),
}

/// Geographic coordinates of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IpInfo {
    pub latitude: f64,
    pub longitude: f64,
}

/// Source of coordinates for an IP.
pub trait Reader: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, Error>;
}

#[derive(Deserialize)]
struct GeoRecord {
    location: Option<GeoLocation>,
}

#[derive(Deserialize)]
struct GeoLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// [`Reader`] over a MaxMind database file.
pub struct MaxmindReader {
    inner: maxminddb::Reader<Vec<u8>>,
}

impl MaxmindReader {
    /// Open the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self {
            inner: maxminddb::Reader::open_readfile(path)?,
        })
    }
}

impl Reader for MaxmindReader {
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, Error> {
        let record: GeoRecord = self.inner.lookup(ip)?;
        let location = record.location.ok_or(Error::NoLocation(ip))?;
        match (location.latitude, location.longitude) {
            (Some(latitude), Some(longitude)) => Ok(IpInfo {
                latitude,
                longitude,
            }),
            _ => Err(Error::NoLocation(ip)),
        }
    }
}

/// Memoizing IP-to-coordinates mapper.
pub struct IpDb {
    reader: Box<dyn Reader>,
    cached: Mutex<HashMap<IpAddr, IpInfo>>,
}

impl IpDb {
    pub fn new(reader: Box<dyn Reader>) -> Self {
        Self {
            reader,
            cached: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `addr` (an IP, `ip:port`, or `host[:port]`) to coordinates.
    pub fn get_ip_info(&self, addr: &str) -> Result<IpInfo, Error> {
        let parsed = canonical_ip(addr)?;

        let mut cached = self.cached.lock().unwrap();
        if let Some(info) = cached.get(&parsed) {
            return Ok(*info);
        }
        let info = self.reader.lookup(parsed)?;
        cached.insert(parsed, info);
        Ok(info)
    }
}

/// Strip an optional port and resolve host names, yielding the IP the
/// database is keyed by.
fn canonical_ip(addr: &str) -> Result<IpAddr, Error> {
    if addr.matches(':').count() > 1 {
        return Err(Error::Ipv6Unsupported(addr.to_string()));
    }
    let host = match addr.split_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => addr,
    };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    // not numeric: resolve as a host name and take the first address
    (host, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::InvalidIp(host.to_string()))
}
