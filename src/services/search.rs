//! Substring search over note titles and content.
//!
//! Matching is case-sensitive containment, evaluated by the metadata store
//! over a full scan of all notes and then paged.

use crate::{
    models::{note::Note, page::Page},
    services::{
        coordinator::{NotesError, NotesResult},
        metadata_store::{NoteFilter, NoteStore},
    },
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct SearchEngine {
    notes: Arc<dyn NoteStore>,
}

impl SearchEngine {
    pub fn new(notes: Arc<dyn NoteStore>) -> Self {
        Self { notes }
    }

    /// Notes whose title or content contains `query`. A blank query is rejected.
    pub async fn search(&self, query: &str, page: Page) -> NotesResult<Vec<Note>> {
        if query.trim().is_empty() {
            return Err(NotesError::InvalidRequest(
                "search query is required".into(),
            ));
        }

        let hits = self
            .notes
            .query(&NoteFilter::TextContains(query.to_string()), page)
            .await?;
        debug!(query, hits = hits.len(), "searched notes");
        Ok(hits)
    }
}
