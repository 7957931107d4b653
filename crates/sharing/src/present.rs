//! The presentation state machine: given a parsed request, decide between
//! streaming bytes, the single-object page, a prefix listing, or a
//! redirect.

use askama::Template;
use axum::extract::Request;
use axum::response::{IntoResponse, Redirect, Response};
use futures::StreamExt;
use http::{header, HeaderValue, StatusCode};
use linkgate_store::{Access, Error as StoreError, ListObjectsOptions, Object, Project};

use crate::error::{Error, ResultExt};
use crate::handler::Handler;
use crate::map::DEFAULT_MAP_WIDTH;
use crate::ranger::serve_content;
use crate::utils::{human_bytes, query_flag, RawQuery};

/// Everything the presenter needs to know about a request.
pub(crate) struct ParsedRequest {
    pub access: Access,
    pub bucket: String,
    /// Key used against the store.
    pub real_key: String,
    /// Key shown in listings and breadcrumbs.
    pub visible_key: String,
    pub title: String,
    /// Root of the breadcrumb trail.
    pub root: Breadcrumb,
    pub wrap_default: bool,
    pub download_default: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Breadcrumb {
    pub prefix: String,
    pub url: String,
}

#[derive(Template)]
#[template(path = "single-object.html")]
struct SingleObjectTemplate {
    title: String,
    base: String,
    key: String,
    size: String,
}

#[derive(Template)]
#[template(path = "prefix-listing.html")]
struct PrefixListingTemplate {
    title: String,
    base: String,
    breadcrumbs: Vec<Breadcrumb>,
    objects: Vec<ListEntry>,
}

struct ListEntry {
    key: String,
    size: String,
    prefix: bool,
}

impl Handler {
    pub(crate) async fn present(
        &self,
        request: &Request,
        pr: ParsedRequest,
    ) -> Result<Response, Error> {
        let query = RawQuery::parse(request.uri().query());

        if query_flag(&query, "map", false) {
            let width = match query.first("width") {
                Some(value) if !value.is_empty() => value.parse::<u32>().map_err(|_| {
                    Error::msg("invalid width").with_status(StatusCode::BAD_REQUEST)
                })?,
                _ => DEFAULT_MAP_WIDTH,
            };
            return self.serve_map(&pr, width).await;
        }
        if query_flag(&query, "locations", false) {
            return self.serve_locations(&pr).await;
        }

        let project = self
            .inner
            .store
            .open_project(&pr.access)
            .await
            .action("open project")?;
        let result = self
            .present_with_project(request, &pr, &project, &query)
            .await;
        if let Err(err) = project.close().await {
            tracing::warn!(error = %err, "unable to close project");
        }
        result
    }

    async fn present_with_project(
        &self,
        request: &Request,
        pr: &ParsedRequest,
        project: &Project,
        query: &RawQuery,
    ) -> Result<Response, Error> {
        let raw_path = request.uri().path();

        if !pr.real_key.is_empty() {
            // there are no objects with the empty key
            let err = match project.stat_object(&pr.bucket, &pr.real_key).await {
                Ok(object) => {
                    return self.show_object(request, pr, project, &object, query).await
                }
                Err(err) => err,
            };
            if !matches!(err, StoreError::ObjectNotFound(_)) {
                return Err(Error::from(err).with_action("stat object"));
            }
            if !pr.real_key.ends_with('/') {
                let not_found = Error::from(err).with_action("stat object");

                // S3-compatible behavior: a key that is only a prefix gets a
                // redirect to its trailing-slash form
                if self.is_prefix(project, pr).await? {
                    return Ok(Redirect::to(&format!("{raw_path}/")).into_response());
                }
                return Err(not_found);
            }
        }

        // the key is now either exactly "" or ends in "/"

        let index_key = format!("{}index.html", pr.real_key);
        match project.stat_object(&pr.bucket, &index_key).await {
            Ok(object) => return self.show_object(request, pr, project, &object, query).await,
            Err(StoreError::ObjectNotFound(_)) => {}
            Err(err) => return Err(Error::from(err).with_action("stat object - index.html")),
        }

        if !raw_path.ends_with('/') {
            // directories need a trailing '/' for the listed hyperlinks to
            // resolve correctly
            return Ok(Redirect::to(&format!("{raw_path}/")).into_response());
        }

        self.serve_prefix(project, pr).await
    }

    /// Whether `real_key` names a prefix with content under it.
    ///
    /// The listing permission may be missing from a download-only share, so
    /// a denied listing answers "no" rather than failing; the index.html
    /// probe before it still lets such shares serve their site.
    async fn is_prefix(&self, project: &Project, pr: &ParsedRequest) -> Result<bool, Error> {
        match project
            .stat_object(&pr.bucket, &format!("{}/index.html", pr.real_key))
            .await
        {
            Ok(_) => return Ok(true),
            Err(StoreError::ObjectNotFound(_)) => {}
            Err(err) => return Err(Error::from(err).with_action("prefix determination stat")),
        }

        let mut items = project.list_objects(
            &pr.bucket,
            ListObjectsOptions {
                prefix: format!("{}/", pr.real_key),
                recursive: true,
                system: false,
            },
        );
        match items.next().await {
            Some(Ok(_)) => Ok(true),
            None => Ok(false),
            Some(Err(StoreError::PermissionDenied)) => Ok(false),
            Some(Err(err)) => Err(Error::from(err).with_action("prefix determination list")),
        }
    }

    async fn show_object(
        &self,
        request: &Request,
        pr: &ParsedRequest,
        project: &Project,
        object: &Object,
        query: &RawQuery,
    ) -> Result<Response, Error> {
        let download = query_flag(query, "download", pr.download_default);
        // wrap unless the view flag asked for the bare object, with the
        // explicit wrap flag overriding both
        let wrap = query_flag(query, "wrap", !query_flag(query, "view", !pr.wrap_default));

        if download || !wrap {
            let mut response = serve_content(request, project, &pr.bucket, object).await?;
            if download {
                // the browser derives the filename from the URL
                response.headers_mut().insert(
                    header::CONTENT_DISPOSITION,
                    HeaderValue::from_static("attachment"),
                );
            }
            return Ok(response);
        }

        let key = object
            .key
            .rsplit('/')
            .next()
            .unwrap_or(object.key.as_str())
            .to_string();
        Ok(self.render(
            StatusCode::OK,
            SingleObjectTemplate {
                title: pr.title.clone(),
                base: self.base(),
                key,
                size: human_bytes(object.system.content_length),
            },
        ))
    }

    async fn serve_prefix(&self, project: &Project, pr: &ParsedRequest) -> Result<Response, Error> {
        let mut breadcrumbs = vec![pr.root.clone()];
        let visible = pr.visible_key.trim_end_matches('/');
        if !visible.is_empty() {
            for (i, segment) in visible.split('/').enumerate() {
                let url = format!("{}{}/", breadcrumbs[i].url, segment);
                breadcrumbs.push(Breadcrumb {
                    prefix: segment.to_string(),
                    url,
                });
            }
        }

        let mut objects = Vec::new();
        let mut items = project.list_objects(
            &pr.bucket,
            ListObjectsOptions {
                prefix: pr.real_key.clone(),
                recursive: false,
                system: true,
            },
        );
        while let Some(item) = items.next().await {
            let item = item.action("list prefix")?;
            objects.push(ListEntry {
                key: item.key[pr.real_key.len()..].to_string(),
                size: if item.is_prefix {
                    String::new()
                } else {
                    human_bytes(item.system.content_length)
                },
                prefix: item.is_prefix,
            });
        }

        Ok(self.render(
            StatusCode::OK,
            PrefixListingTemplate {
                title: pr.title.clone(),
                base: self.base(),
                breadcrumbs,
                objects,
            },
        ))
    }
}
