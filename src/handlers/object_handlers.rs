//! HTTP handlers for object transfers.
//! Bodies are streamed in both directions; chunking and persistence are
//! delegated to `TransferService`.

use crate::{
    errors::AppError,
    models::object::{META_CONTENT_ENCODING, META_CONTENT_TYPE, ObjectId, ObjectMeta},
    services::transfer_service::{TransferError, TransferService},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::Response,
};
use futures::{StreamExt, TryStreamExt};
use std::{collections::BTreeMap, io};
use tokio_util::io::StreamReader;

/// Upload an object to `/{bucket}/{*name}`.
pub async fn put_object(
    State(service): State<TransferService>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, AppError> {
    let id = ObjectId::new(bucket, name).map_err(TransferError::from)?;
    let content_length = parse_content_length(&headers)?;
    let metadata = content_metadata(&headers);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let reader = StreamReader::new(stream);

    service
        .put_object(&id, content_length, metadata, reader)
        .await?;
    Ok(StatusCode::OK)
}

/// Download an object `/{bucket}/{*name}` as a streaming response.
///
/// Headers are sent before the first chunk is fetched. A failure further in
/// cuts the body short; the declared `Content-Length` is left as is.
pub async fn get_object(
    State(service): State<TransferService>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id = ObjectId::new(bucket, name).map_err(TransferError::from)?;
    let (meta, chunks) = service.get_object(&id).await?;

    let chunks =
        chunks.inspect_err(move |err| tracing::error!("get {} aborted mid-stream: {}", id, err));
    let mut response = Response::new(Body::from_stream(chunks));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// Any method other than GET or PUT on an object path.
pub async fn reject_method(method: Method) -> AppError {
    AppError::method_not_allowed(method)
}

/// Paths that do not name both a bucket and an object.
pub async fn malformed_path(method: Method, uri: Uri) -> AppError {
    if method == Method::GET || method == Method::PUT {
        AppError::bad_request(format!("bad bucket and object name: `{}`", uri.path()))
    } else {
        AppError::method_not_allowed(method)
    }
}

fn parse_content_length(headers: &HeaderMap) -> Result<u64, TransferError> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(TransferError::MissingContentLength)?;
    let text = raw.to_str().map_err(|_| {
        TransferError::InvalidContentLength(String::from_utf8_lossy(raw.as_bytes()).into())
    })?;
    text.trim()
        .parse::<u64>()
        .ok()
        .filter(|len| i64::try_from(*len).is_ok())
        .ok_or_else(|| TransferError::InvalidContentLength(text.to_string()))
}

/// Copy the content headers worth keeping into the metadata map.
fn content_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for (name, key) in [
        (header::CONTENT_TYPE, META_CONTENT_TYPE),
        (header::CONTENT_ENCODING, META_CONTENT_ENCODING),
    ] {
        if let Some(value) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            metadata.insert(key.to_string(), value.to_string());
        }
    }
    metadata
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectMeta) {
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.content_length.max(0) as u64),
    );

    if let Some(value) = meta
        .content_type()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }

    let last_modified = meta.created.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn content_length_is_required_and_numeric() {
        assert!(matches!(
            parse_content_length(&HeaderMap::new()),
            Err(TransferError::MissingContentLength)
        ));
        assert!(matches!(
            parse_content_length(&headers(&[(header::CONTENT_LENGTH, "abc")])),
            Err(TransferError::InvalidContentLength(_))
        ));
        assert!(matches!(
            parse_content_length(&headers(&[(header::CONTENT_LENGTH, "-1")])),
            Err(TransferError::InvalidContentLength(_))
        ));
        let too_big = headers(&[(header::CONTENT_LENGTH, "18446744073709551615")]);
        assert!(matches!(
            parse_content_length(&too_big),
            Err(TransferError::InvalidContentLength(_))
        ));
        assert_eq!(
            parse_content_length(&headers(&[(header::CONTENT_LENGTH, "8388609")])).unwrap(),
            8_388_609
        );
    }

    #[test]
    fn metadata_skips_empty_headers() {
        let map = content_metadata(&headers(&[
            (header::CONTENT_TYPE, "text/plain"),
            (header::CONTENT_ENCODING, ""),
        ]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("content-type").map(String::as_str), Some("text/plain"));
    }
}
