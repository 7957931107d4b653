//! Link-sharing gateway server.
//!
//! Resolves shareable URLs and custom host names into reads against the
//! object store and serves them over HTTP.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use linkgate_objectmap::{IpDb, MaxmindReader};
use linkgate_sharing::{AuthServiceConfig, Config, Handler};
use linkgate_store::memory::MemoryDialer;
use linkgate_store::{Config as StoreConfig, PoolConfig};

/// Link-sharing gateway server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for HTTP requests
    #[arg(long, default_value = "0.0.0.0:8080")]
    address: SocketAddr,

    /// Base URLs of this gateway; their hosts distinguish share links from
    /// hosted sites (repeatable)
    #[arg(long = "url-base", required = true)]
    url_bases: Vec<String>,

    /// Directory holding the static web assets
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Longest a cached TXT record stays valid, in seconds
    #[arg(long, default_value = "3600")]
    txt_record_ttl: u64,

    /// Name prefix for TXT record lookups
    #[arg(long, default_value = "txt-")]
    txt_record_prefix: String,

    /// Base URL of the auth service resolving access key ids
    #[arg(long, default_value = "")]
    auth_service_url: String,

    /// Bearer token for the auth service
    #[arg(long, default_value = "")]
    auth_service_token: String,

    /// Explicit DNS server address (e.g. 1.1.1.1:53)
    #[arg(long)]
    dns_server: Option<String>,

    /// Where to send requests for the bare landing path
    #[arg(long)]
    landing_redirect: Option<String>,

    /// Redirect plain-HTTP requests to https://
    #[arg(long)]
    redirect_https: bool,

    /// Trust X-Forwarded-* headers from the terminating proxy
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    use_client_ip_headers: bool,

    /// Peer allowed to set forwarded headers; repeatable, empty trusts any
    #[arg(long = "client-trusted-ip", value_name = "IP")]
    client_trusted_ips: Vec<IpAddr>,

    /// Path to the geolocation database file
    #[arg(long)]
    geo_location_db: Option<PathBuf>,

    /// Maximum pooled store connections
    #[arg(long, default_value = "100")]
    pool_capacity: usize,

    /// Maximum pooled store connections per destination
    #[arg(long, default_value = "5")]
    pool_key_capacity: usize,

    /// Seconds an idle pooled connection is kept
    #[arg(long, default_value = "120")]
    pool_idle_expiration: u64,

    /// Seconds to wait for open requests when shutting down
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::info!("starting link-sharing gateway");

    let mapper = match &args.geo_location_db {
        Some(path) => {
            let reader = MaxmindReader::open(path)
                .with_context(|| format!("opening geolocation database {}", path.display()))?;
            Some(IpDb::new(Box::new(reader)))
        }
        None => None,
    };

    let pool = PoolConfig {
        capacity: args.pool_capacity,
        key_capacity: args.pool_key_capacity,
        idle_expiration: Duration::from_secs(args.pool_idle_expiration),
    };
    // the network dialer is wired in by the deployment; standalone runs
    // serve the in-memory store
    let store = StoreConfig::new(Arc::new(MemoryDialer::new()), pool);

    let config = Config {
        url_bases: args.url_bases,
        static_dir: args.static_dir,
        txt_record_ttl: Duration::from_secs(args.txt_record_ttl),
        txt_record_prefix: args.txt_record_prefix,
        auth_service: AuthServiceConfig {
            base_url: args.auth_service_url,
            token: args.auth_service_token,
        },
        dns_server: args.dns_server,
        landing_redirect_target: args.landing_redirect,
        redirect_https: args.redirect_https,
        use_client_ip_headers: args.use_client_ip_headers,
        client_trusted_ips_list: args.client_trusted_ips,
        store,
    };

    let handler = match Handler::new(config, mapper) {
        Ok(handler) => handler,
        Err(err) => {
            tracing::error!("failed to create handler: {}", err);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    let listener = tokio::net::TcpListener::bind(args.address)
        .await
        .with_context(|| format!("binding {}", args.address))?;
    tracing::info!(addr = %args.address, "gateway listening");

    let mut server_rx = shutdown_rx.clone();
    let service = handler
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, service).with_graceful_shutdown(async move {
        let _ = server_rx.changed().await;
    });

    // bound the graceful drain; anything still open afterwards is dropped
    let shutdown_timeout = Duration::from_secs(args.shutdown_timeout);
    let mut timeout_rx = shutdown_rx.clone();
    let drain_deadline = async move {
        let _ = timeout_rx.changed().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result.context("server error")?,
        _ = drain_deadline => {
            tracing::warn!("graceful shutdown timed out, closing open connections");
        }
    }

    tracing::info!("gateway shutdown complete");
    Ok(())
}
