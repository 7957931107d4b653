//! Handling of link-sharing URLs on the gateway's own domain.

use axum::extract::Request;
use axum::response::{IntoResponse, Redirect, Response};
use http::StatusCode;

use crate::access::parse_access;
use crate::error::Error;
use crate::handler::Handler;
use crate::present::{Breadcrumb, ParsedRequest};

impl Handler {
    /// Dispatch `/s/…`, `/raw/…`, and legacy share paths.
    pub(crate) async fn handle_standard(
        &self,
        request: &Request,
        path: &str,
    ) -> Result<Response, Error> {
        let trimmed = path.trim_start_matches('/');

        let (rest, wrap_default) = if let Some(rest) = trimmed.strip_prefix("raw/") {
            // raw: just the object bytes
            (rest, false)
        } else if let Some(rest) = trimmed.strip_prefix("s/") {
            // s: wrap the object in the branded frame
            (rest, true)
        } else {
            // backwards compatibility: send old-style share links to /s/,
            // keeping the query string byte for byte
            let raw_path = request.uri().path().trim_start_matches('/');
            let location = match request.uri().query() {
                Some(query) => format!("/s/{raw_path}?{query}"),
                None => format!("/s/{raw_path}"),
            };
            return Ok(Redirect::to(&location).into_response());
        };

        let mut parts = rest.splitn(3, '/');
        let access_token = parts.next().unwrap_or_default();
        if access_token.is_empty() {
            return Err(Error::msg("missing access").with_status(StatusCode::BAD_REQUEST));
        }
        let bucket = parts.next().unwrap_or_default();
        if bucket.is_empty() {
            return Err(Error::msg("missing bucket").with_status(StatusCode::BAD_REQUEST));
        }
        let real_key = parts.next().unwrap_or_default().to_string();

        let access = parse_access(access_token, &self.inner.auth, &self.inner.client).await?;

        let pr = ParsedRequest {
            access,
            bucket: bucket.to_string(),
            visible_key: real_key.clone(),
            real_key,
            title: bucket.to_string(),
            root: Breadcrumb {
                prefix: bucket.to_string(),
                url: format!("/s/{access_token}/{bucket}/"),
            },
            wrap_default,
            download_default: false,
        };

        self.present(request, pr).await
    }
}
