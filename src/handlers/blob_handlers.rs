//! Serves objects through signed URLs minted by the object store.

use crate::{errors::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct SignedBlobQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /blobs/{*key}?expires=&signature=` — stream an object if the
/// signature matches and has not expired.
pub async fn get_signed_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedBlobQuery>,
) -> Result<Response, AppError> {
    state.blobs.verify_signed(&key, q.expires, &q.signature)?;
    let (object, file) = state.blobs.open(&key).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.size_bytes.max(0)));
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}
