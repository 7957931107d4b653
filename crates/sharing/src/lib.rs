//! Core of the link-sharing gateway: a stateless HTTP handler that
//! resolves shareable URLs and custom host names into reads against the
//! object store.
//!
//! [`Handler`] owns the whole request pipeline: URL classification,
//! access-token resolution (self-contained grants or auth-service key
//! ids), the TXT-record cache backing custom-domain hosting, the
//! presentation state machine (stream / wrap / listing / redirect), byte
//! range serving, and the map and locations placement views.

mod access;
mod auth;
mod dns;
mod error;
mod handler;
mod hosting;
mod map;
mod present;
mod ranger;
mod standard;
mod txt_records;
mod utils;

pub use auth::{AuthServiceConfig, AuthServiceResponse};
pub use dns::{DnsClient, TxtLookup, TxtResolver};
pub use error::{Error, ResultExt};
pub use handler::{Config, Handler};
