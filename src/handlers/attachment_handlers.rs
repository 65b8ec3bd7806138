//! HTTP handlers for attachments: multipart upload, streaming download,
//! signed URLs and deletion.

use crate::{
    errors::AppError,
    models::attachment::Attachment,
    services::{coordinator::Upload, object_store::SignedUrl},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlQuery {
    pub ttl_seconds: Option<u64>,
}

/// `POST /notes/{id}/documents` — upload the first file part of a multipart body.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        upload = Some(Upload {
            file_name,
            content_type,
            bytes,
        });
        break;
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("No file uploaded"))?;
    let attachment = state.coordinator.add_attachment(&note_id, upload).await?;

    let mut response = (StatusCode::CREATED, Json(&attachment)).into_response();
    let location = format!("/notes/{}/documents/{}", note_id, attachment.id);
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    Ok(response)
}

/// `GET /notes/{id}/documents/{doc_id}/download` — stream the stored object
/// with the content type and file name recorded at upload.
pub async fn download_attachment(
    State(state): State<AppState>,
    Path((note_id, attachment_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (attachment, stream) = state
        .coordinator
        .download_attachment(&note_id, &attachment_id)
        .await?;

    let mut response = Response::new(Body::from_stream(stream));
    set_attachment_headers(response.headers_mut(), &attachment);
    Ok(response)
}

/// `GET /notes/{id}/documents/{doc_id}/url` — time-limited read-only link.
pub async fn attachment_url(
    State(state): State<AppState>,
    Path((note_id, attachment_id)): Path<(String, String)>,
    Query(q): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrl>, AppError> {
    let ttl = q
        .ttl_seconds
        .map(Duration::from_secs)
        .unwrap_or(state.signed_url_ttl);
    Ok(Json(
        state
            .coordinator
            .attachment_url(&note_id, &attachment_id, Some(ttl))
            .await?,
    ))
}

/// `DELETE /notes/{id}/documents/{doc_id}`
pub async fn delete_attachment(
    State(state): State<AppState>,
    Path((note_id, attachment_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .coordinator
        .delete_attachment(&note_id, &attachment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_attachment_headers(headers: &mut axum::http::HeaderMap, attachment: &Attachment) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&attachment.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    let file_name: String = attachment
        .file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
