//! HTTP byte-range serving over the store's offset+length download API.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use http::{header, Method, StatusCode};
use http_range::HttpRange;
use linkgate_store::{DownloadOptions, Object, Project};
use tokio_util::io::ReaderStream;

use crate::error::{Error, ResultExt};

/// Stream an object with support for `Range:` and `If-Modified-Since:`.
///
/// Content-Type is inferred from the object key's extension; multiple
/// ranges produce a `multipart/byteranges` body. A range read that yields
/// fewer bytes than asked for is passed through verbatim.
pub(crate) async fn serve_content(
    request: &Request,
    project: &Project,
    bucket: &str,
    object: &Object,
) -> Result<Response, Error> {
    let size = object.system.content_length.max(0) as u64;
    let last_modified = object.system.created;
    let head = request.method() == Method::HEAD;

    if let Some(since) = request
        .headers()
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
    {
        // HTTP dates have second precision
        if unix_secs(last_modified) <= unix_secs(since) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::LAST_MODIFIED, httpdate::fmt_http_date(last_modified))
                .body(Body::empty())
                .map_err(|err| Error::msg(err.to_string()));
        }
    }

    let content_type = mime_guess::from_path(&object.key)
        .first_or_octet_stream()
        .to_string();

    let ranges = match request
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
    {
        None => Vec::new(),
        Some(value) => match HttpRange::parse(value, size) {
            Ok(ranges) => ranges,
            Err(_) => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                    .body(Body::empty())
                    .map_err(|err| Error::msg(err.to_string()));
            }
        },
    };

    let builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::LAST_MODIFIED, httpdate::fmt_http_date(last_modified));

    let response = match ranges.as_slice() {
        [] => {
            let body = if head || size == 0 {
                Body::empty()
            } else {
                range_body(project, bucket, &object.key, 0, -1).await?
            };
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, size)
                .body(body)
        }
        [range] => {
            let end = range.start + range.length - 1;
            let body = if head {
                Body::empty()
            } else {
                range_body(
                    project,
                    bucket,
                    &object.key,
                    range.start as i64,
                    range.length as i64,
                )
                .await?
            };
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, end, size),
                )
                .header(header::CONTENT_LENGTH, range.length)
                .body(body)
        }
        _ => {
            return serve_multipart(
                builder, project, bucket, object, &content_type, size, &ranges, head,
            )
            .await;
        }
    };
    response.map_err(|err| Error::msg(err.to_string()))
}

async fn range_body(
    project: &Project,
    bucket: &str,
    key: &str,
    offset: i64,
    length: i64,
) -> Result<Body, Error> {
    let reader = project
        .download_object(bucket, key, DownloadOptions { offset, length })
        .await
        .action("download object")?;
    Ok(Body::from_stream(ReaderStream::new(reader)))
}

#[allow(clippy::too_many_arguments)]
async fn serve_multipart(
    builder: http::response::Builder,
    project: &Project,
    bucket: &str,
    object: &Object,
    content_type: &str,
    size: u64,
    ranges: &[HttpRange],
    head: bool,
) -> Result<Response, Error> {
    let boundary = multipart_boundary(&object.key, size);

    let mut parts = Vec::with_capacity(ranges.len());
    let mut total: u64 = 0;
    for range in ranges {
        let end = range.start + range.length - 1;
        let part_header = format!(
            "--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {}-{}/{size}\r\n\r\n",
            range.start, end
        );
        total += part_header.len() as u64 + range.length + 2;
        parts.push((part_header, range.start, range.length));
    }
    let trailer = format!("--{boundary}--\r\n");
    total += trailer.len() as u64;

    let builder = builder
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/byteranges; boundary={boundary}"),
        )
        .header(header::CONTENT_LENGTH, total);

    if head {
        return builder
            .body(Body::empty())
            .map_err(|err| Error::msg(err.to_string()));
    }

    let project = project.clone();
    let bucket = bucket.to_string();
    let key = object.key.clone();

    let body = futures::stream::iter(parts)
        .then(move |(part_header, start, length)| {
            let project = project.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            async move {
                let data = match project
                    .download_object(
                        &bucket,
                        &key,
                        DownloadOptions {
                            offset: start as i64,
                            length: length as i64,
                        },
                    )
                    .await
                {
                    Ok(reader) => ReaderStream::new(reader).boxed(),
                    Err(err) => futures::stream::iter(vec![Err(io::Error::new(
                        io::ErrorKind::Other,
                        err,
                    ))])
                    .boxed(),
                };
                futures::stream::iter(vec![Ok(Bytes::from(part_header))])
                    .chain(data)
                    .chain(futures::stream::iter(vec![Ok(Bytes::from_static(b"\r\n"))]))
            }
        })
        .flatten()
        .chain(futures::stream::iter(vec![Ok(Bytes::from(trailer))]));

    builder
        .body(Body::from_stream(body))
        .map_err(|err| Error::msg(err.to_string()))
}

/// A boundary that no object byte stream can be expected to contain,
/// derived deterministically so responses stay reproducible.
fn multipart_boundary(key: &str, size: u64) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    size.hash(&mut hasher);
    format!("{:016x}{:016x}", hasher.finish(), size.rotate_left(17))
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
