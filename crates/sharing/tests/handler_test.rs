//! End-to-end tests driving the handler through its router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use http::{header, Request, StatusCode};
use tower::ServiceExt;

use linkgate_sharing::{Config, Error, Handler, TxtLookup, TxtResolver};
use linkgate_store::memory::{grant, MemoryDialer};
use linkgate_store::{Config as StoreConfig, PoolConfig};

#[derive(Debug, Default)]
struct FakeResolver {
    records: Vec<(String, Vec<String>)>,
}

#[async_trait]
impl TxtResolver for FakeResolver {
    async fn lookup_txt(&self, name: &str) -> Result<TxtLookup, Error> {
        self.records
            .iter()
            .find(|(host, _)| host == name)
            .map(|(_, records)| TxtLookup {
                records: records.clone(),
                ttl: Duration::from_secs(300),
            })
            .ok_or_else(|| Error::msg(format!("no TXT records for {name}")))
    }
}

struct TestEnv {
    dialer: MemoryDialer,
    token: String,
    config: Config,
    resolver: FakeResolver,
}

impl TestEnv {
    fn new() -> Self {
        let dialer = MemoryDialer::new();
        let token = grant("integration share");
        dialer.upload(&token, "testbucket", "test/foo", b"FOO");

        let mut config = Config::default();
        config.url_bases = vec!["http://link.test".to_string()];
        config.store = StoreConfig::new(Arc::new(dialer.clone()), PoolConfig::default());

        Self {
            dialer,
            token,
            config,
            resolver: FakeResolver::default(),
        }
    }

    fn handler(self) -> Handler {
        Handler::with_resolver(self.config, None, Box::new(self.resolver)).unwrap()
    }
}

fn get(path_and_query: &str) -> Request<Body> {
    request("GET", "link.test", path_and_query, &[])
}

fn request(method: &str, host: &str, path_and_query: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path_and_query)
        .header(header::HOST, host);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn bucket_listing_shows_directories() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("test/"), "listing should show the directory row: {body}");
}

#[tokio::test]
async fn bucket_without_trailing_slash_redirects() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/s/{token}/testbucket/")
    );
}

#[tokio::test]
async fn prefix_without_trailing_slash_redirects() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/s/{token}/testbucket/test/")
    );
}

#[tokio::test]
async fn download_flag_streams_as_attachment() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo?download")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "attachment");
    assert_eq!(body_string(response).await, "FOO");
}

#[tokio::test]
async fn wrapped_object_renders_the_page() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("foo"), "wrapper should show the object name");
    assert!(body.contains("3 B"), "wrapper should show the size: {body}");
    assert_ne!(body, "FOO");
}

#[tokio::test]
async fn view_flag_streams_raw_bytes() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo?view")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "FOO");
}

#[tokio::test]
async fn raw_path_defaults_to_streaming() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/raw/{token}/testbucket/test/foo")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "FOO");
}

#[tokio::test]
async fn range_requests_answer_partial_content() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request(
            "GET",
            "link.test",
            &format!("/raw/{token}/testbucket/test/foo"),
            &[("range", "bytes=1-2")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 1-2/3");
    assert_eq!(body_string(response).await, "OO");
}

#[tokio::test]
async fn missing_object_renders_not_found() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/bar")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_string(response).await.contains("Oops! Object not found."));
}

#[tokio::test]
async fn missing_bucket_renders_not_found() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/nosuchbucket/")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_string(response).await.contains("Oops! Bucket not found."));
}

#[tokio::test]
async fn malformed_access_is_a_bad_request() {
    let handler = TestEnv::new().handler();

    let response = handler
        .router()
        .oneshot(get("/s/BADACCESS/testbucket/test/foo"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("invalid access"));
}

#[tokio::test]
async fn missing_access_and_bucket_have_specific_messages() {
    let handler = TestEnv::new().handler();

    let response = handler.router().oneshot(get("/s/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("missing access"));

    let handler = TestEnv::new().handler();
    let response = handler.router().oneshot(get("/s/token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("missing bucket"));
}

#[tokio::test]
async fn legacy_paths_redirect_preserving_the_query() {
    let handler = TestEnv::new().handler();

    let response = handler
        .router()
        .oneshot(get("/T/testbucket/key?download=yes&x=%20y"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/s/T/testbucket/key?download=yes&x=%20y"
    );
}

#[tokio::test]
async fn other_methods_are_rejected() {
    let handler = TestEnv::new().handler();

    let response = handler
        .router()
        .oneshot(request("POST", "link.test", "/s/T/b/k", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn landing_redirect_covers_the_bare_path() {
    let mut env = TestEnv::new();
    env.config.landing_redirect_target = Some("https://www.link.test/".to_string());
    let handler = env.handler();

    let response = handler.router().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "https://www.link.test/");
}

#[tokio::test]
async fn https_redirect_is_permanent() {
    let mut env = TestEnv::new();
    env.config.redirect_https = true;
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("https://link.test/s/{token}/testbucket/test/foo")
    );
}

#[tokio::test]
async fn forwarded_https_requests_are_not_redirected() {
    let mut env = TestEnv::new();
    env.config.redirect_https = true;
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request(
            "GET",
            "link.test",
            &format!("/raw/{token}/testbucket/test/foo"),
            &[("x-forwarded-proto", "https")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn locations_is_always_a_json_array() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo?locations")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["locations"].is_array());
    assert_eq!(body["pieceCount"], 0);
}

#[tokio::test]
async fn map_notes_inlined_objects() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get(&format!("/s/{token}/testbucket/test/foo?map&width=400")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
    let body = body_string(response).await;
    assert!(body.contains(r#"width="400""#));
    assert!(body.contains("metadata with strong encryption"));
}

#[tokio::test]
async fn unknown_paths_on_our_host_redirect_or_fail_with_bad_request() {
    // no landing redirect: anything unrecognized is either a legacy-style
    // redirect or a malformed share URL
    let handler = TestEnv::new().handler();
    let response = handler.router().oneshot(get("/justonepart")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let handler = TestEnv::new().handler();
    let response = handler.router().oneshot(get("/s/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn hosting_env() -> (TestEnv, String) {
    let env_token = grant("hosting share");
    let mut env = TestEnv::new();
    env.dialer
        .upload(&env_token, "testbucket", "site/index.html", b"<h1>hi</h1>");
    env.dialer
        .upload(&env_token, "testbucket", "site/docs/readme.md", b"# docs");
    let half = env_token.len() / 2;
    env.resolver.records.push((
        "txt-example.test".to_string(),
        vec![
            format!("storj_grant-1:{}", &env_token[..half]),
            format!("storj_grant-2:{}", &env_token[half..]),
            "storj_root:testbucket/site".to_string(),
        ],
    ));
    (env, env_token)
}

#[tokio::test]
async fn hosting_serves_the_site_index() {
    let (env, _) = hosting_env();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request("GET", "example.test", "/", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "<h1>hi</h1>");
}

#[tokio::test]
async fn hosting_host_port_is_ignored() {
    let (env, _) = hosting_env();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request("GET", "example.test:8080", "/", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "<h1>hi</h1>");
}

#[tokio::test]
async fn hosting_serves_nested_files() {
    let (env, _) = hosting_env();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request("GET", "example.test", "/docs/readme.md", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "# docs");
}

#[tokio::test]
async fn hosting_lists_prefixes_without_an_index() {
    let (env, _) = hosting_env();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request("GET", "example.test", "/docs/", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("readme.md"), "listing should name the file: {body}");
}

#[tokio::test]
async fn hosting_for_unknown_hosts_fails() {
    let (env, _) = hosting_env();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request("GET", "unknown.test", "/", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn listing_denied_shares_still_serve_index_only_sites() {
    let env = TestEnv::new();
    let token = env.token.clone();
    env.dialer
        .upload(&token, "testbucket", "site/index.html", b"<h1>hi</h1>");
    env.dialer.deny_listing(&token);
    let handler = env.handler();

    // the prefix probe must fall back to the index.html stat instead of
    // failing on the denied listing
    let response = handler
        .router()
        .oneshot(get(&format!("/raw/{token}/testbucket/site")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = handler
        .router()
        .oneshot(get(&format!("/raw/{token}/testbucket/site/")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "<h1>hi</h1>");
}

#[tokio::test]
async fn static_assets_are_served_from_disk() {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("styles.css"), "body { margin: 0 }").unwrap();

    let mut env = TestEnv::new();
    env.config.static_dir = Some(static_dir.path().to_path_buf());
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get("/static/styles.css"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(body_string(response).await, "body { margin: 0 }");

    let handler = TestEnv::new().handler();
    let response = handler
        .router()
        .oneshot(get("/static/missing.css"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn static_paths_cannot_escape_the_asset_root() {
    let static_dir = tempfile::tempdir().unwrap();
    let mut env = TestEnv::new();
    env.config.static_dir = Some(static_dir.path().to_path_buf());
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(get("/static/../secrets.txt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn head_requests_carry_headers_without_a_body() {
    let env = TestEnv::new();
    let token = env.token.clone();
    let handler = env.handler();

    let response = handler
        .router()
        .oneshot(request(
            "HEAD",
            "link.test",
            &format!("/raw/{token}/testbucket/test/foo"),
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "3");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}
