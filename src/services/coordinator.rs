//! src/services/coordinator.rs
//!
//! Coordinator — every operation that spans the metadata store and the object
//! store goes through here. The two stores fail independently and nothing is
//! transactional across them, so the order of steps decides what a failure
//! leaves behind:
//!
//! - add attachment uploads the object before recording it, so a failure
//!   leaves an orphan object, never a reference to a missing one;
//! - delete attachment removes the object before the entry, and the entry
//!   removal can be retried safely;
//! - delete note removes objects one by one, recording each removal on the
//!   note, and stops at the first object store failure.
//!
//! Orphans are reclaimed by `sweep_orphans`.

use crate::{
    models::{
        attachment::Attachment,
        note::{Note, NoteDraft},
        page::Page,
    },
    services::{
        metadata_store::{MetadataError, NoteFilter, NoteStore},
        object_store::{
            ByteStream, ObjectStore, ObjectStoreError, SignedUrl, StoredObject, new_object_key,
        },
    },
};
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempts at a read-modify-replace before a version conflict is returned.
const MAX_REPLACE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("note `{0}` not found")]
    NoteNotFound(String),
    #[error("attachment `{attachment_id}` not found on note `{note_id}`")]
    AttachmentNotFound {
        note_id: String,
        attachment_id: String,
    },
    #[error("object `{0}` is missing from the object store")]
    ObjectMissing(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("note `{id}` was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        id: String,
        expected: i64,
        actual: i64,
    },
    #[error("metadata store unavailable: {0}")]
    MetadataUnavailable(#[source] MetadataError),
    #[error("object store unavailable: {0}")]
    ObjectStoreUnavailable(#[source] ObjectStoreError),
    #[error(
        "deleting note `{note_id}` stopped after {deleted} attachment(s), {remaining} remaining: {source}"
    )]
    PartialCascadeFailure {
        note_id: String,
        deleted: usize,
        remaining: usize,
        #[source]
        source: ObjectStoreError,
    },
}

pub type NotesResult<T> = Result<T, NotesError>;

impl From<MetadataError> for NotesError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(id) => NotesError::NoteNotFound(id),
            MetadataError::Conflict {
                id,
                expected,
                actual,
            } => NotesError::Conflict {
                id,
                expected,
                actual,
            },
            other => NotesError::MetadataUnavailable(other),
        }
    }
}

impl From<ObjectStoreError> for NotesError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(key) => NotesError::ObjectMissing(key),
            err @ (ObjectStoreError::InvalidTtl | ObjectStoreError::InvalidObjectKey) => {
                NotesError::InvalidRequest(err.to_string())
            }
            other => NotesError::ObjectStoreUnavailable(other),
        }
    }
}

/// The store capabilities a coordinator works against.
#[derive(Clone)]
pub struct StoreContext {
    pub notes: Arc<dyn NoteStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl StoreContext {
    pub fn new(notes: Arc<dyn NoteStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { notes, objects }
    }
}

/// A single uploaded file, fully buffered.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct Coordinator {
    ctx: StoreContext,
}

fn require_title(draft: &NoteDraft) -> NotesResult<String> {
    match draft.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => Ok(draft.title.clone().unwrap_or_default()),
        _ => Err(NotesError::InvalidRequest("title is required".into())),
    }
}

impl Coordinator {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    pub fn stores(&self) -> &StoreContext {
        &self.ctx
    }

    async fn load_note(&self, id: &str) -> NotesResult<Note> {
        self.ctx
            .notes
            .get(id)
            .await?
            .ok_or_else(|| NotesError::NoteNotFound(id.to_string()))
    }

    fn locate<'a>(note: &'a Note, attachment_id: &str) -> NotesResult<&'a Attachment> {
        note.find_attachment(attachment_id)
            .ok_or_else(|| NotesError::AttachmentNotFound {
                note_id: note.id().to_string(),
                attachment_id: attachment_id.to_string(),
            })
    }

    /// Apply `change` to `note`, stamp `updatedDate` and replace the record.
    ///
    /// On a version conflict the note is read again and `change` re-applied,
    /// up to `MAX_REPLACE_ATTEMPTS` times.
    async fn replace_with<F>(&self, mut note: Note, mut change: F) -> NotesResult<Note>
    where
        F: FnMut(&mut Note) + Send,
    {
        let mut attempt = 1;
        loop {
            change(&mut note);
            note.touch();
            match self.ctx.notes.replace(&note).await {
                Ok(saved) => return Ok(saved),
                Err(MetadataError::Conflict { id, actual, .. })
                    if attempt < MAX_REPLACE_ATTEMPTS =>
                {
                    debug!(note_id = %id, attempt, actual, "version conflict, re-reading note");
                    attempt += 1;
                    note = self.load_note(&id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn create_note(&self, draft: NoteDraft) -> NotesResult<Note> {
        let mut note = Note::new(require_title(&draft)?);
        note.content = draft.content;
        note.tags = draft.tags.unwrap_or_default();

        let note = self.ctx.notes.put(note).await?;
        info!(note_id = note.id(), "created note");
        Ok(note)
    }

    pub async fn get_note(&self, id: &str) -> NotesResult<Note> {
        self.load_note(id).await
    }

    pub async fn list_notes(&self, page: Page) -> NotesResult<Vec<Note>> {
        Ok(self.ctx.notes.query(&NoteFilter::All, page).await?)
    }

    /// Replace title, content and tags. A concurrent change surfaces as
    /// `Conflict`, as does a stale `draft.version`.
    pub async fn update_note(&self, id: &str, draft: NoteDraft) -> NotesResult<Note> {
        let title = require_title(&draft)?;
        let mut note = self.load_note(id).await?;

        if let Some(expected) = draft.version {
            if expected != note.version {
                return Err(NotesError::Conflict {
                    id: id.to_string(),
                    expected,
                    actual: note.version,
                });
            }
        }

        note.title = title;
        note.content = draft.content;
        note.tags = draft.tags.unwrap_or_default();
        note.touch();

        let note = self.ctx.notes.replace(&note).await?;
        info!(note_id = id, version = note.version, "updated note");
        Ok(note)
    }

    /// Upload a file and record it on the note.
    ///
    /// Empty bodies are rejected before touching either store. If recording
    /// fails after the upload the object is left orphaned.
    pub async fn add_attachment(&self, note_id: &str, upload: Upload) -> NotesResult<Attachment> {
        if upload.bytes.is_empty() {
            return Err(NotesError::InvalidRequest("uploaded file is empty".into()));
        }

        let note = self.load_note(note_id).await?;

        let blob_name = new_object_key(&upload.file_name);
        let file_size = upload.bytes.len() as i64;
        self.ctx
            .objects
            .put(&blob_name, upload.bytes, &upload.content_type)
            .await?;

        let attachment = Attachment::new(
            upload.file_name,
            upload.content_type,
            file_size,
            blob_name.clone(),
        );

        let recorded = attachment.clone();
        let result = self
            .replace_with(note, move |note| {
                if note.find_attachment(&recorded.id).is_none() {
                    note.attachments.push(recorded.clone());
                }
            })
            .await;

        if let Err(err) = result {
            warn!(
                note_id,
                blob_name = %blob_name,
                error = %err,
                "attachment upload not recorded; object left orphaned"
            );
            return Err(err);
        }

        info!(note_id, attachment_id = %attachment.id, size = file_size, "added attachment");
        Ok(attachment)
    }

    /// Attachment metadata plus a stream of its bytes.
    pub async fn download_attachment(
        &self,
        note_id: &str,
        attachment_id: &str,
    ) -> NotesResult<(Attachment, ByteStream)> {
        let note = self.load_note(note_id).await?;
        let attachment = Self::locate(&note, attachment_id)?.clone();

        match self.ctx.objects.get(&attachment.blob_name).await {
            Ok(stream) => Ok((attachment, stream)),
            Err(err) => {
                if matches!(err, ObjectStoreError::NotFound(_)) {
                    warn!(
                        note_id,
                        attachment_id,
                        blob_name = %attachment.blob_name,
                        "attachment references a missing object"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// A read-only, time-limited URL for the attachment's object.
    pub async fn attachment_url(
        &self,
        note_id: &str,
        attachment_id: &str,
        ttl: Option<Duration>,
    ) -> NotesResult<SignedUrl> {
        let note = self.load_note(note_id).await?;
        let attachment = Self::locate(&note, attachment_id)?;
        Ok(self.ctx.objects.signed_url(&attachment.blob_name, ttl)?)
    }

    /// Delete the object first, then drop the entry from the note.
    pub async fn delete_attachment(&self, note_id: &str, attachment_id: &str) -> NotesResult<()> {
        let note = self.load_note(note_id).await?;
        let blob_name = Self::locate(&note, attachment_id)?.blob_name.clone();

        if !self.ctx.objects.delete(&blob_name).await? {
            debug!(blob_name = %blob_name, "object already absent");
        }

        self.replace_with(note, |note| {
            note.take_attachment(attachment_id);
        })
        .await?;

        info!(note_id, attachment_id, "deleted attachment");
        Ok(())
    }

    /// Delete every attachment object, then the note record.
    ///
    /// Each object removal is recorded on the note before the next one starts,
    /// so a retry after `PartialCascadeFailure` only touches what is left.
    pub async fn delete_note(&self, id: &str) -> NotesResult<()> {
        let mut note = self.load_note(id).await?;
        let mut deleted = 0;

        while let Some(attachment) = note.attachments.first().cloned() {
            if let Err(source) = self.ctx.objects.delete(&attachment.blob_name).await {
                let remaining = note.attachments.len();
                warn!(
                    note_id = id,
                    deleted,
                    remaining,
                    blob_name = %attachment.blob_name,
                    error = %source,
                    "cascade delete aborted"
                );
                return Err(NotesError::PartialCascadeFailure {
                    note_id: id.to_string(),
                    deleted,
                    remaining,
                    source,
                });
            }

            note = self
                .replace_with(note, |note| {
                    note.take_attachment(&attachment.id);
                })
                .await?;
            deleted += 1;
        }

        if !self.ctx.notes.delete(id).await? {
            return Err(NotesError::NoteNotFound(id.to_string()));
        }

        info!(note_id = id, attachments = deleted, "deleted note");
        Ok(())
    }

    /// Objects older than `grace` that no note references.
    pub async fn find_orphans(&self, grace: Duration) -> NotesResult<Vec<StoredObject>> {
        let grace = TimeDelta::from_std(grace)
            .map_err(|_| NotesError::InvalidRequest("grace period out of range".into()))?;
        let cutoff = Utc::now() - grace;

        // List objects before scanning notes, so an upload recorded between
        // the two reads is still seen as referenced.
        let objects = self.ctx.objects.list().await?;
        let referenced: HashSet<String> = self
            .ctx
            .notes
            .query(&NoteFilter::All, Page::default())
            .await?
            .into_iter()
            .flat_map(|note| note.attachments)
            .map(|attachment| attachment.blob_name)
            .collect();

        Ok(objects
            .into_iter()
            .filter(|object| object.created_at <= cutoff && !referenced.contains(&object.key))
            .collect())
    }

    /// Delete orphaned objects older than `grace`. Returns how many were removed.
    pub async fn sweep_orphans(&self, grace: Duration) -> NotesResult<usize> {
        let orphans = self.find_orphans(grace).await?;
        let mut removed = 0;
        for orphan in &orphans {
            if self.ctx.objects.delete(&orphan.key).await? {
                removed += 1;
                info!(key = %orphan.key, size = orphan.size_bytes, "removed orphaned object");
            }
        }
        Ok(removed)
    }
}
