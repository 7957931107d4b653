//! The link-sharing HTTP handler: top-level dispatch and error
//! classification.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Router;
use http::{header, Method, StatusCode};
use linkgate_objectmap::IpDb;
use tower_http::trace::TraceLayer;

use crate::auth::AuthServiceConfig;
use crate::dns::{DnsClient, TxtResolver};
use crate::error::Error;
use crate::txt_records::TxtRecords;

/// Handler configuration.
#[derive(Debug)]
pub struct Config {
    /// Potential base URLs of the gateway, fully formed. The first is used
    /// to construct URLs returned to clients; all of their hosts identify
    /// "our" domain.
    pub url_bases: Vec<String>,

    /// Where the web assets live on disk.
    pub static_dir: Option<PathBuf>,

    /// Longest a cached TXT record entry stays valid.
    pub txt_record_ttl: Duration,

    /// Name prefix for TXT lookups; operators publish their records under
    /// `<prefix><host>`.
    pub txt_record_prefix: String,

    /// Auth service endpoint for resolving access key ids.
    pub auth_service: AuthServiceConfig,

    /// Explicit DNS server address (e.g. `1.1.1.1:53`); system resolver
    /// configuration when unset.
    pub dns_server: Option<String>,

    /// Where to send requests for the bare landing path.
    pub landing_redirect_target: Option<String>,

    /// Redirect plain-HTTP requests to `https://`.
    pub redirect_https: bool,

    /// Trust `X-Forwarded-*` headers from the terminating proxy.
    pub use_client_ip_headers: bool,

    /// Peers allowed to set forwarded headers; empty trusts any peer.
    pub client_trusted_ips_list: Vec<IpAddr>,

    /// Object store client configuration.
    pub store: linkgate_store::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url_bases: Vec::new(),
            static_dir: None,
            txt_record_ttl: Duration::from_secs(3600),
            txt_record_prefix: "txt-".to_string(),
            auth_service: AuthServiceConfig::default(),
            dns_server: None,
            landing_redirect_target: None,
            redirect_https: false,
            use_client_ip_headers: true,
            client_trusted_ips_list: Vec::new(),
            store: linkgate_store::Config::default(),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) url_bases: Vec<url::Url>,
    pub(crate) static_dir: Option<PathBuf>,
    pub(crate) txt_records: TxtRecords,
    pub(crate) auth: AuthServiceConfig,
    pub(crate) mapper: Option<IpDb>,
    pub(crate) landing_redirect: Option<String>,
    pub(crate) redirect_https: bool,
    pub(crate) use_client_ip_headers: bool,
    pub(crate) client_trusted_ips: Vec<IpAddr>,
    pub(crate) store: linkgate_store::Config,
    pub(crate) client: reqwest::Client,
}

/// The link sharing HTTP handler.
#[derive(Clone)]
pub struct Handler {
    pub(crate) inner: Arc<Inner>,
}

impl Handler {
    /// Create a handler resolving TXT records through a real DNS client.
    pub fn new(config: Config, mapper: Option<IpDb>) -> Result<Self, Error> {
        let dns = DnsClient::new(config.dns_server.as_deref())?;
        Self::with_resolver(config, mapper, Box::new(dns))
    }

    /// Create a handler with an explicit TXT resolver.
    pub fn with_resolver(
        config: Config,
        mapper: Option<IpDb>,
        resolver: Box<dyn TxtResolver>,
    ) -> Result<Self, Error> {
        if config.url_bases.is_empty() {
            return Err(Error::msg("requires at least one url base"));
        }
        let mut url_bases = Vec::with_capacity(config.url_bases.len());
        for base in &config.url_bases {
            url_bases.push(parse_url_base(base)?);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                url_bases,
                static_dir: config.static_dir,
                txt_records: TxtRecords::new(
                    config.txt_record_ttl,
                    config.txt_record_prefix,
                    resolver,
                ),
                auth: config.auth_service,
                mapper,
                landing_redirect: config.landing_redirect_target,
                redirect_https: config.redirect_https,
                use_client_ip_headers: config.use_client_ip_headers,
                client_trusted_ips: config.client_trusted_ips_list,
                store: config.store,
                client: reqwest::Client::new(),
            }),
        })
    }

    /// The routes served by this handler.
    pub fn router(&self) -> Router {
        let router: Router<Handler> = Router::new().fallback(root);
        router.with_state(self.clone()).layer(TraceLayer::new_for_http())
    }

    /// Handle one request, answering exactly once.
    pub async fn serve(&self, request: Request) -> Response {
        let client_ip = self.client_ip(&request);
        match self.serve_inner(&request).await {
            Ok(response) => response,
            Err(err) => self.error_response(err, client_ip),
        }
    }

    /// The connection peer's IP, when the server installed connect info.
    fn peer_ip(&self, request: &Request) -> Option<IpAddr> {
        request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())
    }

    /// Whether `X-Forwarded-*` headers on this request may be believed:
    /// forwarded headers are enabled, and the peer is on the trusted list
    /// (an empty list trusts any peer).
    fn trusts_forwarded_headers(&self, request: &Request) -> bool {
        self.inner.use_client_ip_headers
            && (self.inner.client_trusted_ips.is_empty()
                || self
                    .peer_ip(request)
                    .is_some_and(|peer| self.inner.client_trusted_ips.contains(&peer)))
    }

    /// The requesting client's IP: the forwarded-for chain head when the
    /// proxy is trusted, otherwise the connection peer.
    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        if self.trusts_forwarded_headers(request) {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .and_then(|value| value.trim().parse::<IpAddr>().ok());
            if forwarded.is_some() {
                return forwarded;
            }
        }
        self.peer_ip(request)
    }

    async fn serve_inner(&self, request: &Request) -> Result<Response, Error> {
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            return Err(
                Error::msg("method not allowed").with_status(StatusCode::METHOD_NOT_ALLOWED)
            );
        }

        let host = request_host(request)
            .ok_or_else(|| Error::msg("missing host").with_status(StatusCode::BAD_REQUEST))?;

        if !self.is_domain_ours(&host) {
            return self.handle_hosting(request, &host).await;
        }

        if self.inner.redirect_https && self.request_scheme(request) == "http" {
            let path_and_query = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let location = format!("https://{host}{path_and_query}");
            return Ok(Redirect::permanent(&location).into_response());
        }

        let path = decoded_path(request);
        if let Some(rest) = path.strip_prefix("/static/") {
            return self.serve_static(request, rest).await;
        }

        if let Some(target) = &self.inner.landing_redirect {
            if path.is_empty() || path == "/" {
                return Ok(Redirect::to(target).into_response());
            }
        }

        self.handle_standard(request, &path).await
    }

    fn is_domain_ours(&self, host: &str) -> bool {
        self.inner
            .url_bases
            .iter()
            .any(|base| match base.host_str() {
                Some(base_host) => compare_hosts(host, base_host),
                None => false,
            })
    }

    async fn serve_static(&self, request: &Request, rest: &str) -> Result<Response, Error> {
        let Some(root) = &self.inner.static_dir else {
            return Err(Error::msg("no static assets").with_status(StatusCode::NOT_FOUND));
        };
        let relative = PathBuf::from(rest);
        if relative.components().any(|component| {
            !matches!(component, std::path::Component::Normal(_))
        }) {
            return Err(Error::msg("invalid static path").with_status(StatusCode::BAD_REQUEST));
        }

        let path = root.join(relative);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::msg("static asset not found").with_status(StatusCode::NOT_FOUND))
            }
            Err(err) => return Err(Error::from(err).with_action("read static asset")),
        };

        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        let length = contents.len();
        let body = if request.method() == Method::HEAD {
            Body::empty()
        } else {
            Body::from(contents)
        };
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime.as_ref())
            .header(header::CONTENT_LENGTH, length)
            .body(body)
            .map_err(|err| Error::msg(err.to_string()))
    }

    /// The scheme a request arrived over, honoring the terminating proxy's
    /// `X-Forwarded-Proto` under the same trust policy as the client IP.
    fn request_scheme<'a>(&self, request: &'a Request) -> &'a str {
        if self.trusts_forwarded_headers(request) {
            if let Some(proto) = request
                .headers()
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
            {
                return proto;
            }
        }
        request.uri().scheme_str().unwrap_or("http")
    }

    /// Classify a pipeline error into a status and a canonical message, and
    /// render the error page.
    fn error_response(&self, err: Error, client_ip: Option<IpAddr>) -> Response {
        use linkgate_store::Error as StoreError;

        let mut status = StatusCode::INTERNAL_SERVER_ERROR;
        let mut message = "Internal server error. Please try again later.";
        let mut detail = None;
        let mut skip_log = false;

        match err.store_error() {
            Some(StoreError::BucketNotFound(_)) => {
                status = StatusCode::NOT_FOUND;
                message = "Oops! Bucket not found.";
                skip_log = true;
            }
            Some(StoreError::ObjectNotFound(_)) => {
                status = StatusCode::NOT_FOUND;
                message = "Oops! Object not found.";
                skip_log = true;
            }
            Some(StoreError::PermissionDenied) => {
                status = StatusCode::FORBIDDEN;
                message = "Access denied.";
                skip_log = true;
            }
            _ => {
                status = err.status(status);
                match status {
                    StatusCode::FORBIDDEN => {
                        message = "Access denied.";
                        skip_log = true;
                    }
                    StatusCode::NOT_FOUND => {
                        message = "Not found.";
                        skip_log = true;
                    }
                    StatusCode::BAD_REQUEST | StatusCode::METHOD_NOT_ALLOWED => {
                        message = "Malformed request. Please try again.";
                        detail = Some(err.to_string());
                        skip_log = true;
                    }
                    _ => {}
                }
            }
        }

        if skip_log {
            tracing::debug!(error = %err, status = %status, "request failed");
        } else {
            tracing::error!(
                error = %err,
                action = err.action("unknown"),
                client_ip = ?client_ip,
                "unable to handle request"
            );
        }

        self.render(
            status,
            ErrorTemplate {
                title: "Error".to_string(),
                base: self.base(),
                message: message.to_string(),
                detail,
            },
        )
    }

    /// The base URL rendered pages resolve their assets against.
    pub(crate) fn base(&self) -> String {
        self.inner.url_bases[0]
            .as_str()
            .trim_end_matches('/')
            .to_string()
    }

    pub(crate) fn render<T: Template>(&self, status: StatusCode, template: T) -> Response {
        match template.render() {
            Ok(body) => (status, Html(body)).into_response(),
            Err(err) => {
                tracing::error!(error = %err, "error while executing template");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn root(State(handler): State<Handler>, request: Request) -> Response {
    handler.serve(request).await
}

#[allow(dead_code)]
fn _assert_serve_send(h: Handler, r: Request) {
    fn is_send<T: Send>(_: T) {}
    is_send(h.serve(r));
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    title: String,
    base: String,
    message: String,
    detail: Option<String>,
}

/// The `Host` a request was addressed to.
pub(crate) fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()))
}

/// The request path, percent-decoded.
pub(crate) fn decoded_path(request: &Request) -> String {
    percent_encoding::percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .into_owned()
}

/// Host without its port; `[v6]` brackets are unwrapped and bare IPv6
/// addresses pass through whole.
pub(crate) fn strip_port(addr: &str) -> &str {
    if addr.starts_with('[') {
        if let Some(close) = addr.find(']') {
            return &addr[1..close];
        }
    }
    match addr.rfind(':') {
        Some(colon) if !addr[..colon].contains(':') => &addr[..colon],
        _ => addr,
    }
}

/// Whether two host[:port] strings name the same host.
pub(crate) fn compare_hosts(addr1: &str, addr2: &str) -> bool {
    strip_port(addr1) == strip_port(addr2)
}

fn parse_url_base(base: &str) -> Result<url::Url, Error> {
    let parsed = url::Url::parse(base)
        .map_err(|err| Error::msg(format!("invalid URL base {base}: {err}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::msg("URL base must be http:// or https://"));
    }
    if parsed.host_str().is_none() {
        return Err(Error::msg("URL base must contain host"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(Error::msg("URL base must not contain user info"));
    }
    if parsed.query().is_some() {
        return Err(Error::msg("URL base must not contain query values"));
    }
    if parsed.fragment().is_some() {
        return Err(Error::msg("URL base must not contain a fragment"));
    }
    Ok(parsed)
}
