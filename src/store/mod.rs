//! Storage contracts used by the ingestion core, plus reference backends.
//!
//! The production backends (a structured record store and a binary object
//! store) live outside this crate; [`memory`] and [`fs`] implement the same
//! contracts for tests and for the command-line tool.

pub mod fs;
pub mod memory;

use crate::error::Result;
use crate::model::identity::UserIdentity;
use crate::model::note::Note;

/// Token ↔ identity mapping.
pub trait TokenStore: Send + Sync {
    /// Identity owning `token`, if any.
    fn identity_for(&self, token: &str) -> Result<Option<UserIdentity>>;

    /// Token already bound to `identity`, if any.
    fn token_of(&self, identity: &UserIdentity) -> Result<Option<String>>;

    /// Bind `token` to `identity` unless the identity already has one.
    ///
    /// Must be atomic per identity: concurrent callers all get back the same
    /// (winning) token.
    fn insert_if_absent(&self, identity: &UserIdentity, token: &str) -> Result<String>;
}

/// Append-only note records.
pub trait NoteStore: Send + Sync {
    /// Persist a new note.
    fn insert(&self, note: &Note) -> Result<()>;

    /// Up to `limit` notes by `author`, newest first.
    fn recent_by_author(&self, author: &UserIdentity, limit: usize) -> Result<Vec<Note>>;
}

/// Metadata of a stored object, as reported after the write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectInfo {
    /// Storage key within the bucket.
    pub key: String,
    /// Declared media type.
    pub media_type: String,
    /// Stored size in bytes.
    pub size: u64,
}

/// Named binary objects in one logical bucket.
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket objects are written to.
    fn bucket(&self) -> &str;

    /// Start writing a new object.
    fn open_writer(&self, key: &str, media_type: &str) -> Result<Box<dyn ObjectWriter + '_>>;

    /// Grant anonymous read access to objects in the bucket.
    fn set_public_read(&self) -> Result<()>;

    /// Look up a finished object.
    fn stat(&self, key: &str) -> Result<Option<ObjectInfo>>;
}

/// An in-progress object write. Nothing is visible until [`close`](Self::close).
pub trait ObjectWriter {
    /// Append bytes to the object.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Finish the write and publish the object.
    fn close(self: Box<Self>) -> Result<()>;
}
