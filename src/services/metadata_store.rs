//! src/services/metadata_store.rs
//!
//! The metadata store contract and its SQLite implementation. Every note is
//! its own partition keyed by `id`; anything other than a point lookup is a
//! full scan over the `notes` table. The note is persisted as a camelCase JSON
//! document, with `title`, `content`, `created_date` and `version` mirrored
//! into columns for filtering, ordering and compare-and-swap.

use crate::models::{note::Note, page::Page};
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("note `{0}` not found")]
    NotFound(String),
    #[error("note has no id")]
    MissingId,
    #[error("note `{id}` version mismatch: expected {expected}, stored {actual}")]
    Conflict { id: String, expected: i64, actual: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Predicate applied by `NoteStore::query`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoteFilter {
    All,
    /// Case-sensitive substring match on title or content.
    TextContains(String),
}

impl NoteFilter {
    #[cfg(test)]
    pub fn matches(&self, note: &Note) -> bool {
        match self {
            NoteFilter::All => true,
            NoteFilter::TextContains(needle) => note.contains_text(needle),
        }
    }
}

/// Clamp a count to SQLite's signed range; a negative LIMIT or OFFSET
/// would mean "no bound" rather than "past the end".
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Structured record store for notes.
///
/// Results of `query` are ordered by `createdDate`, then `id`.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn get(&self, id: &str) -> MetadataResult<Option<Note>>;

    /// Upsert. Assigns a fresh id when the note has none.
    async fn put(&self, note: Note) -> MetadataResult<Note>;

    /// Overwrite an existing note if its stored version still equals
    /// `note.version`. Returns the note with its new version.
    async fn replace(&self, note: &Note) -> MetadataResult<Note>;

    async fn delete(&self, id: &str) -> MetadataResult<bool>;

    async fn query(&self, filter: &NoteFilter, page: Page) -> MetadataResult<Vec<Note>>;

    async fn ping(&self) -> MetadataResult<()>;
}

/// Generate a new note id.
pub fn new_note_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(FromRow)]
struct NoteRow {
    version: i64,
    document: String,
}

impl NoteRow {
    fn into_note(self) -> MetadataResult<Note> {
        let mut note: Note = serde_json::from_str(&self.document)?;
        note.version = self.version;
        Ok(note)
    }
}

/// `NoteStore` backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteNoteStore {
    db: Arc<SqlitePool>,
}

impl SqliteNoteStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn stored_version(&self, id: &str) -> MetadataResult<Option<i64>> {
        let version = sqlx::query_scalar::<_, i64>("SELECT version FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl NoteStore for SqliteNoteStore {
    async fn get(&self, id: &str) -> MetadataResult<Option<Note>> {
        let row = sqlx::query_as::<_, NoteRow>("SELECT version, document FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        row.map(NoteRow::into_note).transpose()
    }

    async fn put(&self, mut note: Note) -> MetadataResult<Note> {
        let id = note.id.get_or_insert_with(new_note_id).clone();
        let document = serde_json::to_string(&note)?;
        let created = note
            .created_date
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let version = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO notes (id, version, title, content, created_date, document)
            VALUES (?, 1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = notes.version + 1,
                title = excluded.title,
                content = excluded.content,
                created_date = excluded.created_date,
                document = excluded.document
            RETURNING version
            "#,
        )
        .bind(&id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(created)
        .bind(document)
        .fetch_one(&*self.db)
        .await?;

        debug!(note_id = %id, version, "upserted note");
        note.version = version;
        Ok(note)
    }

    async fn replace(&self, note: &Note) -> MetadataResult<Note> {
        let id = note.id.as_deref().ok_or(MetadataError::MissingId)?;
        let mut next = note.clone();
        next.version = note.version + 1;
        let document = serde_json::to_string(&next)?;

        let result = sqlx::query(
            "UPDATE notes SET version = ?, title = ?, content = ?, document = ?
             WHERE id = ? AND version = ?",
        )
        .bind(next.version)
        .bind(&next.title)
        .bind(&next.content)
        .bind(document)
        .bind(id)
        .bind(note.version)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return match self.stored_version(id).await? {
                None => Err(MetadataError::NotFound(id.to_string())),
                Some(actual) => Err(MetadataError::Conflict {
                    id: id.to_string(),
                    expected: note.version,
                    actual,
                }),
            };
        }

        Ok(next)
    }

    async fn delete(&self, id: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: &NoteFilter, page: Page) -> MetadataResult<Vec<Note>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT version, document FROM notes");

        if let NoteFilter::TextContains(needle) = filter {
            // instr() is a case-sensitive containment test, unlike LIKE
            builder.push(" WHERE instr(title, ");
            builder.push_bind(needle.clone());
            builder.push(") > 0 OR instr(COALESCE(content, ''), ");
            builder.push_bind(needle.clone());
            builder.push(") > 0");
        }

        builder.push(" ORDER BY created_date ASC, id ASC");

        if page.limit.is_some() || page.skip.is_some() {
            builder.push(" LIMIT ");
            builder.push_bind(page.limit.map(sql_count).unwrap_or(-1));
            builder.push(" OFFSET ");
            builder.push_bind(sql_count(page.skip.unwrap_or(0)));
        }

        let rows: Vec<NoteRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        rows.into_iter().map(NoteRow::into_note).collect()
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
