use std::io::SeekFrom;
use std::path::Path;
use axum::body::Body;
use axum::response::{IntoResponse, Redirect, Response};
use http::{header::*, Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use crate::error::MediaError;
use crate::utils::str_utils::StringExtensions;

const BYTES_UNIT: &str = "bytes";

/// Half-open byte span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// Parses `bytes=<start>-<end>?` with an exclusive end. Anything else means the whole file.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(value) = header.and_then(|x| x.strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    let Some((start, end)) = value.split_once('-') else {
        return RangeRequest::Full;
    };
    let is_digits = |x: &str| x.bytes().all(|b| b.is_ascii_digit());
    if start.is_empty() || !is_digits(start) || !is_digits(end) {
        return RangeRequest::Full;
    }
    let Ok(start) = start.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = match end {
        "" => size,
        end => match end.parse::<u64>() {
            Ok(end) => end.min(size),
            Err(_) => return RangeRequest::Full,
        },
    };
    let range = ByteRange { start, end };
    if range.is_empty() {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial(range)
}

/// What to send and how to describe it.
pub struct Delivery<'a> {
    pub path: &'a Path,
    pub mime_type: &'a str,
    /// Only for unmodified originals.
    pub etag: Option<&'a str>,
    /// `None` when the request path already names the file.
    pub disposition_name: Option<&'a str>,
    pub no_store: bool,
}

pub async fn serve_file(method: &Method, headers: &HeaderMap, delivery: Delivery<'_>) -> Result<Response, MediaError> {
    let mut file = tokio::fs::File::open(delivery.path).await?;
    let size = file.metadata().await?.len();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static(BYTES_UNIT));
    response_headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
    response_headers.insert(CONTENT_TYPE, header_value(delivery.mime_type)?);
    if let Some(etag) = delivery.etag {
        response_headers.insert(ETAG, header_value(&format!("\"{}\"", etag))?);
    }
    if let Some(name) = delivery.disposition_name {
        let value = format!("inline; filename=\"{}\"", name.to_ascii_lossy());
        response_headers.insert(CONTENT_DISPOSITION, header_value(&value)?);
    }
    if delivery.no_store {
        response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    let range = headers.get(RANGE).and_then(|x| x.to_str().ok());
    let (status, span) = match parse_range(range, size) {
        RangeRequest::Full => (StatusCode::OK, ByteRange { start: 0, end: size }),
        RangeRequest::Partial(span) => {
            let content_range = format!("{} {}-{}/{}", BYTES_UNIT, span.start, span.end - 1, size);
            response_headers.insert(CONTENT_RANGE, header_value(&content_range)?);
            (StatusCode::PARTIAL_CONTENT, span)
        }
        RangeRequest::Unsatisfiable => {
            response_headers.insert(CONTENT_RANGE, header_value(&format!("{} */{}", BYTES_UNIT, size))?);
            response_headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, response_headers, Body::empty()).into_response());
        }
    };
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(span.len()));

    let body = if *method == Method::HEAD {
        Body::empty()
    } else {
        if span.start > 0 {
            file.seek(SeekFrom::Start(span.start)).await?;
        }
        Body::from_stream(ReaderStream::new(file.take(span.len())))
    };
    Ok((status, response_headers, body).into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, MediaError> {
    HeaderValue::from_str(value).map_err(|e| MediaError::Internal(e.into()))
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

pub fn redirect_to(target: &str) -> Response {
    Redirect::temporary(target).into_response()
}
