//! In-memory backends, with fault injection for the object store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{NoteDropError, Result};
use crate::model::identity::UserIdentity;
use crate::model::note::Note;

use super::{NoteStore, ObjectInfo, ObjectStore, ObjectWriter, TokenStore};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| NoteDropError::RecordStore("memory store lock poisoned".into()))
}

#[derive(Default)]
struct TokenMaps {
    by_token: HashMap<String, UserIdentity>,
    by_identity: HashMap<UserIdentity, String>,
}

/// Token mapping held in a mutex-guarded pair of maps.
#[derive(Default)]
pub struct MemoryTokenStore {
    maps: Mutex<TokenMaps>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with a token.
    pub fn len(&self) -> usize {
        lock(&self.maps).map(|m| m.by_identity.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for MemoryTokenStore {
    fn identity_for(&self, token: &str) -> Result<Option<UserIdentity>> {
        Ok(lock(&self.maps)?.by_token.get(token).cloned())
    }

    fn token_of(&self, identity: &UserIdentity) -> Result<Option<String>> {
        Ok(lock(&self.maps)?.by_identity.get(identity).cloned())
    }

    fn insert_if_absent(&self, identity: &UserIdentity, token: &str) -> Result<String> {
        let mut maps = lock(&self.maps)?;
        if let Some(existing) = maps.by_identity.get(identity) {
            return Ok(existing.clone());
        }
        maps.by_identity.insert(identity.clone(), token.to_string());
        maps.by_token.insert(token.to_string(), identity.clone());
        Ok(token.to_string())
    }
}

/// Notes kept in insertion order.
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: Mutex<Vec<Note>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored note, oldest first.
    pub fn all(&self) -> Vec<Note> {
        lock(&self.notes).map(|n| n.clone()).unwrap_or_default()
    }
}

impl NoteStore for MemoryNoteStore {
    fn insert(&self, note: &Note) -> Result<()> {
        lock(&self.notes)?.push(note.clone());
        Ok(())
    }

    fn recent_by_author(&self, author: &UserIdentity, limit: usize) -> Result<Vec<Note>> {
        let notes = lock(&self.notes)?;
        let mut matching: Vec<Note> = notes
            .iter()
            .filter(|n| n.author.as_ref() == Some(author))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

/// Where [`MemoryObjectStore`] should fail, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Open,
    AccessRule,
    Write,
    Close,
    /// `close` reports success but the object never becomes visible.
    Finalize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    media_type: String,
    data: Vec<u8>,
}

/// Objects held in a map, optionally failing at one [`FaultPoint`].
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    public_read: AtomicBool,
    fault: Option<FaultPoint>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
            public_read: AtomicBool::new(false),
            fault: None,
        }
    }

    /// A store that fails every operation at `fault`.
    pub fn failing_at(bucket: impl Into<String>, fault: FaultPoint) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new(bucket)
        }
    }

    /// Bytes of a stored object.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .ok()
            .and_then(|o| o.get(key).map(|obj| obj.data.clone()))
    }

    /// Number of visible objects.
    pub fn len(&self) -> usize {
        lock(&self.objects).map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the public-read rule has been applied.
    pub fn is_public(&self) -> bool {
        self.public_read.load(Ordering::SeqCst)
    }

    fn injected(&self, point: FaultPoint, key: &str) -> Result<()> {
        if self.fault == Some(point) {
            return Err(NoteDropError::RecordStore(format!(
                "injected {point:?} failure for '{key}'"
            )));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn open_writer(&self, key: &str, media_type: &str) -> Result<Box<dyn ObjectWriter + '_>> {
        self.injected(FaultPoint::Open, key)?;
        Ok(Box::new(MemoryObjectWriter {
            store: self,
            key: key.to_string(),
            media_type: media_type.to_string(),
            buf: Vec::new(),
        }))
    }

    fn set_public_read(&self) -> Result<()> {
        self.injected(FaultPoint::AccessRule, &self.bucket)?;
        self.public_read.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stat(&self, key: &str) -> Result<Option<ObjectInfo>> {
        Ok(lock(&self.objects)?.get(key).map(|obj| ObjectInfo {
            key: key.to_string(),
            media_type: obj.media_type.clone(),
            size: obj.data.len() as u64,
        }))
    }
}

struct MemoryObjectWriter<'a> {
    store: &'a MemoryObjectStore,
    key: String,
    media_type: String,
    buf: Vec<u8>,
}

impl ObjectWriter for MemoryObjectWriter<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.store.injected(FaultPoint::Write, &self.key)?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.store.injected(FaultPoint::Close, &self.key)?;
        if self.store.fault == Some(FaultPoint::Finalize) {
            // Lost write: nothing is published
            return Ok(());
        }
        let this = *self;
        lock(&this.store.objects)?.insert(
            this.key,
            StoredObject {
                media_type: this.media_type,
                data: this.buf,
            },
        );
        Ok(())
    }
}
