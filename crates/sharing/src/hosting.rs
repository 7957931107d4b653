//! Link sharing via custom domains.
//!
//! Requests arriving under a foreign `Host` are served from whatever part
//! of the store the host's TXT records point at.

use axum::extract::Request;
use axum::response::Response;

use crate::error::Error;
use crate::handler::{decoded_path, strip_port, Handler};
use crate::present::{Breadcrumb, ParsedRequest};

impl Handler {
    pub(crate) async fn handle_hosting(
        &self,
        request: &Request,
        host: &str,
    ) -> Result<Response, Error> {
        let host = strip_port(host);
        let (access, root) = self.inner.txt_records.fetch_access(host).await?;

        let path = decoded_path(request);
        let (bucket, real_key) = determine_bucket_and_object_key(&root, &path);

        let pr = ParsedRequest {
            access,
            bucket,
            real_key,
            visible_key: path.trim_matches('/').to_string(),
            title: host.to_string(),
            root: Breadcrumb {
                prefix: host.to_string(),
                url: "/".to_string(),
            },
            wrap_default: false,
            download_default: false,
        };

        self.present(request, pr).await
    }
}

/// Split a TXT root and a request path into the bucket and object key.
///
/// The first segment of the root is the bucket; any remainder is a prefix
/// that gets a trailing slash if it lacks one, then the URL path (first
/// leading slash stripped) is appended.
pub(crate) fn determine_bucket_and_object_key(root: &str, url_path: &str) -> (String, String) {
    let (bucket, prefix) = match root.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (root, ""),
    };
    let mut key = prefix.to_string();
    if !key.is_empty() && !key.ends_with('/') {
        key.push('/');
    }
    key.push_str(url_path.strip_prefix('/').unwrap_or(url_path));
    (bucket.to_string(), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_root_into_bucket_and_key() {
        let cases = [
            (("b/p", "/x/y"), ("b", "p/x/y")),
            (("b", "/"), ("b", "")),
            (("b/p/", "x"), ("b", "p/x")),
            (("b", "/index.html"), ("b", "index.html")),
            (("b/deep/prefix", "/file"), ("b", "deep/prefix/file")),
            (("b", ""), ("b", "")),
        ];
        for ((root, path), (bucket, key)) in cases {
            assert_eq!(
                determine_bucket_and_object_key(root, path),
                (bucket.to_string(), key.to_string()),
                "root={root:?} path={path:?}"
            );
        }
    }
}
