//! Metadata describing one binary object owned by a note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One uploaded file, as recorded on its parent note.
///
/// `file_name`, `content_type` and `file_size` are taken from the upload
/// as-is. `blob_name` is the object store key and is never reused.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Unique identifier (simple UUID form).
    pub id: String,

    /// Original filename supplied by the uploader.
    pub file_name: String,

    /// MIME type supplied by the uploader.
    pub content_type: String,

    /// Size in bytes of the uploaded body.
    pub file_size: i64,

    /// Key of the payload in the object store.
    pub blob_name: String,

    /// When the payload was uploaded.
    pub uploaded_date: DateTime<Utc>,
}

impl Attachment {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        file_size: i64,
        blob_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            file_size,
            blob_name: blob_name.into(),
            uploaded_date: Utc::now(),
        }
    }
}
