//! Defines routes for notes, their attachments and signed blob access.
//!
//! ## Structure
//! - **Note endpoints**
//!   - `GET    /notes` — list notes (supports skip, limit)
//!   - `POST   /notes` — create note
//!   - `GET    /notes/search` — substring search (query, skip, limit)
//!   - `GET    /notes/{id}` — fetch note
//!   - `PUT    /notes/{id}` — replace title/content/tags
//!   - `DELETE /notes/{id}` — delete note and its attachments
//!
//! - **Attachment endpoints**
//!   - `POST   /notes/{id}/documents` — multipart upload
//!   - `GET    /notes/{id}/documents/{doc_id}/download` — stream file
//!   - `GET    /notes/{id}/documents/{doc_id}/url` — signed read-only URL
//!   - `DELETE /notes/{id}/documents/{doc_id}` — delete attachment
//!
//! - **Blob endpoint**
//!   - `GET    /blobs/{*key}` — object access through a signed URL

use crate::{
    handlers::{
        attachment_handlers::{
            attachment_url, delete_attachment, download_attachment, upload_attachment,
        },
        blob_handlers::get_signed_blob,
        health_handlers::{healthz, readyz},
        note_handlers::{
            create_note, delete_note, get_note, list_notes, search_notes, update_note,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for the notes API.
///
/// `max_upload_bytes` bounds request bodies on the upload route.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Note routes
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/search", get(search_notes))
        .route(
            "/notes/{id}",
            get(get_note).put(update_note).delete(delete_note),
        )
        // Attachment routes
        .route(
            "/notes/{id}/documents",
            post(upload_attachment).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/notes/{id}/documents/{doc_id}/download",
            get(download_attachment),
        )
        .route("/notes/{id}/documents/{doc_id}/url", get(attachment_url))
        .route("/notes/{id}/documents/{doc_id}", delete(delete_attachment))
        // Signed object access
        .route("/blobs/{*key}", get(get_signed_blob))
}
