//! In-memory store fakes and fixtures for unit tests.
//!
//! `MemoryNoteStore` and `MemoryObjectStore` implement the store contracts
//! over plain maps and can be told to fail specific calls, which is how the
//! partial-failure residue of the coordinator is exercised.

use crate::{
    migrations,
    models::{note::Note, page::Page},
    services::{
        metadata_store::{MetadataError, MetadataResult, NoteFilter, NoteStore, new_note_id},
        object_store::{
            ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult, SignedUrl, StoredObject,
        },
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Barrier;

/// A single-connection in-memory SQLite pool with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrations::apply(&pool).await.unwrap();
    Arc::new(pool)
}

fn unavailable() -> sqlx::Error {
    sqlx::Error::PoolTimedOut
}

#[derive(Default)]
pub struct MemoryNoteStore {
    notes: Mutex<BTreeMap<String, Note>>,
    /// Number of upcoming `replace` calls that fail as if the store were down.
    pub fail_replaces: AtomicUsize,
    /// Last-writer-wins mode: `replace` skips the version comparison.
    pub ignore_versions: AtomicBool,
    /// When set, `get` copies the note and then waits here, so concurrent
    /// callers leave with the same snapshot. Cleared once released.
    pub read_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Number of `replace` calls rejected for a stale version.
    pub conflicts: AtomicUsize,
}

impl MemoryNoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn get(&self, id: &str) -> MetadataResult<Option<Note>> {
        let snapshot = self.notes.lock().unwrap().get(id).cloned();
        let barrier = self.read_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
            *self.read_barrier.lock().unwrap() = None;
        }
        Ok(snapshot)
    }

    async fn put(&self, mut note: Note) -> MetadataResult<Note> {
        let id = note.id.get_or_insert_with(new_note_id).clone();
        let mut notes = self.notes.lock().unwrap();
        note.version = notes.get(&id).map(|n| n.version + 1).unwrap_or(1);
        notes.insert(id, note.clone());
        Ok(note)
    }

    async fn replace(&self, note: &Note) -> MetadataResult<Note> {
        if self
            .fail_replaces
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MetadataError::Sqlx(unavailable()));
        }

        let id = note.id.clone().ok_or(MetadataError::MissingId)?;
        let mut notes = self.notes.lock().unwrap();
        let stored = notes
            .get(&id)
            .ok_or_else(|| MetadataError::NotFound(id.clone()))?;
        if !self.ignore_versions.load(Ordering::SeqCst) && stored.version != note.version {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(MetadataError::Conflict {
                id,
                expected: note.version,
                actual: stored.version,
            });
        }

        let mut next = note.clone();
        next.version = stored.version + 1;
        notes.insert(id, next.clone());
        Ok(next)
    }

    async fn delete(&self, id: &str) -> MetadataResult<bool> {
        Ok(self.notes.lock().unwrap().remove(id).is_some())
    }

    async fn query(&self, filter: &NoteFilter, page: Page) -> MetadataResult<Vec<Note>> {
        let mut hits: Vec<Note> = self
            .notes
            .lock()
            .unwrap()
            .values()
            .filter(|note| filter.matches(note))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(page.apply(hits))
    }

    async fn ping(&self) -> MetadataResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (StoredObject, Bytes)>>,
    /// Every `delete` fails once this many deletes have succeeded.
    pub fail_deletes_after: Mutex<Option<usize>>,
    deletes: AtomicUsize,
    pub puts: AtomicUsize,
    /// Entries that `list` reports but `delete` no longer finds, as when
    /// another process removed them in between.
    stale_listing: Mutex<Vec<StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Insert an object as if it had been uploaded at `created_at`.
    pub fn insert_at(&self, key: &str, created_at: DateTime<Utc>) {
        let object = placeholder(key, created_at);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (object, Bytes::from_static(b"x")));
    }

    /// Make `list` report `key` although nothing is stored under it.
    pub fn list_vanished(&self, key: &str, created_at: DateTime<Utc>) {
        self.stale_listing
            .lock()
            .unwrap()
            .push(placeholder(key, created_at));
    }
}

fn placeholder(key: &str, created_at: DateTime<Utc>) -> StoredObject {
    StoredObject {
        key: key.to_string(),
        content_type: "application/octet-stream".into(),
        size_bytes: 1,
        etag: String::new(),
        created_at,
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<StoredObject> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let object = StoredObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as i64,
            etag: format!("{:x}", md5::compute(&bytes)),
            created_at: Utc::now(),
        };
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (object.clone(), bytes));
        Ok(object)
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(stream::once(async move { Ok::<_, io::Error>(bytes) }).boxed())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<bool> {
        if let Some(limit) = *self.fail_deletes_after.lock().unwrap() {
            if self.deletes.load(Ordering::SeqCst) >= limit {
                return Err(ObjectStoreError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "object store timed out",
                )));
            }
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }

    async fn list(&self) -> ObjectStoreResult<Vec<StoredObject>> {
        let mut listed: Vec<StoredObject> = self
            .objects
            .lock()
            .unwrap()
            .values()
            .map(|(object, _)| object.clone())
            .collect();
        listed.extend(self.stale_listing.lock().unwrap().iter().cloned());
        Ok(listed)
    }

    fn signed_url(&self, key: &str, ttl: Option<Duration>) -> ObjectStoreResult<SignedUrl> {
        let ttl = ttl.unwrap_or(Duration::from_secs(3600));
        let expires_at = Utc::now() + TimeDelta::from_std(ttl).unwrap();
        Ok(SignedUrl {
            url: format!("memory://{key}?expires={}", expires_at.timestamp()),
            expires_at,
        })
    }

    async fn ping(&self) -> ObjectStoreResult<()> {
        Ok(())
    }
}
