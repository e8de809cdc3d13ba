//! Local filesystem backends.
//!
//! ```text
//! <root>/
//! ├── tokens/
//! │   ├── by-identity/<sha256(identity)>.json   {"identity", "token"}
//! │   └── by-token/<token>                      identity
//! ├── notes.jsonl                               one Note per line
//! └── objects/<bucket>/
//!     ├── .acl.json                             bucket default object ACL
//!     ├── <key>                                 object bytes
//!     └── <key>.meta.json                       ObjectInfo
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{NoteDropError, Result};
use crate::model::identity::UserIdentity;
use crate::model::note::Note;

use super::{NoteStore, ObjectInfo, ObjectStore, ObjectWriter, TokenStore};

// ── Tokens ──────────────────────────────────────────────────────

#[derive(serde::Serialize, serde::Deserialize)]
struct TokenRecord {
    identity: UserIdentity,
    token: String,
}

/// Token mapping stored as one small file per direction.
///
/// The per-identity record is written to a scratch file and then hard-linked
/// into place. The link fails if a record exists, which settles concurrent
/// first-time minting, and readers only ever see a complete record.
pub struct FsTokenStore {
    by_identity: PathBuf,
    by_token: PathBuf,
}

impl FsTokenStore {
    /// Open (creating if needed) the token directories under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let base = root.as_ref().join("tokens");
        let by_identity = base.join("by-identity");
        let by_token = base.join("by-token");
        for dir in [&by_identity, &by_token] {
            std::fs::create_dir_all(dir).map_err(|e| NoteDropError::io(dir, e))?;
        }
        Ok(Self {
            by_identity,
            by_token,
        })
    }

    /// Record path for an identity: the identity is hashed so any string is safe.
    fn identity_path(&self, identity: &UserIdentity) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_str().as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.by_identity.join(format!("{hash}.json"))
    }

    /// Tokens arrive from untrusted mail; anything but ASCII alphanumerics
    /// cannot name a record.
    fn token_path(&self, token: &str) -> Option<PathBuf> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(self.by_token.join(token))
    }

    fn read_record(&self, path: &Path) -> Result<Option<TokenRecord>> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NoteDropError::io(path, e)),
        }
    }
}

impl TokenStore for FsTokenStore {
    fn identity_for(&self, token: &str) -> Result<Option<UserIdentity>> {
        let Some(path) = self.token_path(token) else {
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(identity) => Ok(Some(UserIdentity::new(identity))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NoteDropError::io(&path, e)),
        }
    }

    fn token_of(&self, identity: &UserIdentity) -> Result<Option<String>> {
        Ok(self
            .read_record(&self.identity_path(identity))?
            .map(|record| record.token))
    }

    fn insert_if_absent(&self, identity: &UserIdentity, token: &str) -> Result<String> {
        let token_path = self.token_path(token).ok_or_else(|| {
            NoteDropError::RecordStore(format!("token '{token}' is not alphanumeric"))
        })?;
        std::fs::write(&token_path, identity.as_str())
            .map_err(|e| NoteDropError::io(&token_path, e))?;

        let record_path = self.identity_path(identity);
        let record = TokenRecord {
            identity: identity.clone(),
            token: token.to_string(),
        };
        let temp_path = self.by_identity.join(temp_name("record"));
        let written = serde_json::to_vec(&record)
            .map_err(NoteDropError::from)
            .and_then(|data| {
                let mut file = File::create(&temp_path)
                    .map_err(|e| NoteDropError::io(&temp_path, e))?;
                file.write_all(&data)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| NoteDropError::io(&temp_path, e))
            });
        // A hard link publishes the complete record, or fails if one exists
        let linked = written.map(|()| std::fs::hard_link(&temp_path, &record_path));
        let _ = std::fs::remove_file(&temp_path);

        match linked? {
            Ok(()) => {
                info!(identity = %identity, "Minted mailbox token");
                Ok(token.to_string())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost the race (or the identity already had a token)
                if let Err(e) = std::fs::remove_file(&token_path) {
                    warn!(path = %token_path.display(), error = %e, "Could not remove unused token record");
                }
                self.read_record(&record_path)?
                    .map(|record| record.token)
                    .ok_or_else(|| {
                        NoteDropError::RecordStore(format!(
                            "token record for '{identity}' vanished"
                        ))
                    })
            }
            Err(e) => Err(NoteDropError::io(&record_path, e)),
        }
    }
}

// ── Notes ───────────────────────────────────────────────────────

/// Notes appended as JSON lines to a single file.
pub struct FsNoteStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl FsNoteStore {
    /// Use `<root>/notes.jsonl`, creating `root` if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| NoteDropError::io(root, e))?;
        Ok(Self {
            path: root.join("notes.jsonl"),
            append_lock: Mutex::new(()),
        })
    }
}

impl NoteStore for FsNoteStore {
    fn insert(&self, note: &Note) -> Result<()> {
        let mut line = serde_json::to_vec(note)?;
        line.push(b'\n');

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| NoteDropError::RecordStore("note log lock poisoned".into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| NoteDropError::io(&self.path, e))?;
        file.write_all(&line)
            .and_then(|()| file.sync_data())
            .map_err(|e| NoteDropError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "Note appended");
        Ok(())
    }

    fn recent_by_author(&self, author: &UserIdentity, limit: usize) -> Result<Vec<Note>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NoteDropError::io(&self.path, e)),
        };

        let mut matching = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| NoteDropError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Note>(&line) {
                Ok(note) if note.author.as_ref() == Some(author) => matching.push(note),
                Ok(_) => {}
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "Skipping unreadable note record");
                }
            }
        }

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

// ── Objects ─────────────────────────────────────────────────────

/// Objects stored as files in `<root>/objects/<bucket>/`.
///
/// Writes go to a hidden `.partial` file and are renamed into place on close,
/// so readers never see a half-written object.
pub struct FsObjectStore {
    bucket: String,
    dir: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) the bucket directory.
    pub fn open(root: impl AsRef<Path>, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let dir = root.as_ref().join("objects").join(file_name_for(&bucket));
        std::fs::create_dir_all(&dir).map_err(|e| NoteDropError::io(&dir, e))?;
        Ok(Self { bucket, dir })
    }

    /// Directory holding the bucket's objects.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path where the bytes of `key` live.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", file_name_for(key)))
    }
}

impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn open_writer(&self, key: &str, media_type: &str) -> Result<Box<dyn ObjectWriter + '_>> {
        // Unique per writer: concurrent writes of one key never share a file
        let partial = self.dir.join(temp_name(&file_name_for(key)));
        let file = File::create(&partial).map_err(|e| NoteDropError::io(&partial, e))?;
        Ok(Box::new(FsObjectWriter {
            store: self,
            key: key.to_string(),
            media_type: media_type.to_string(),
            partial,
            file,
            written: 0,
        }))
    }

    fn set_public_read(&self) -> Result<()> {
        let path = self.dir.join(".acl.json");
        let acl = serde_json::json!({
            "bucket": self.bucket,
            "default_object_acl": [{ "entity": "allUsers", "role": "READER" }],
        });
        let data = serde_json::to_vec_pretty(&acl)?;
        std::fs::write(&path, data).map_err(|e| NoteDropError::io(&path, e))
    }

    fn stat(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let path = self.object_path(key);
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NoteDropError::io(&path, e)),
        };
        let meta_path = self.meta_path(key);
        let media_type = match std::fs::read(&meta_path) {
            Ok(data) => serde_json::from_slice::<ObjectInfo>(&data)?.media_type,
            Err(e) if e.kind() == ErrorKind::NotFound => "application/octet-stream".to_string(),
            Err(e) => return Err(NoteDropError::io(&meta_path, e)),
        };
        Ok(Some(ObjectInfo {
            key: key.to_string(),
            media_type,
            size: meta.len(),
        }))
    }
}

struct FsObjectWriter<'a> {
    store: &'a FsObjectStore,
    key: String,
    media_type: String,
    partial: PathBuf,
    file: File,
    written: u64,
}

impl ObjectWriter for FsObjectWriter<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .map_err(|e| NoteDropError::io(&self.partial, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.file
            .flush()
            .and_then(|()| self.file.sync_all())
            .map_err(|e| NoteDropError::io(&self.partial, e))?;

        let info = ObjectInfo {
            key: self.key.clone(),
            media_type: self.media_type.clone(),
            size: self.written,
        };
        let meta_path = self.store.meta_path(&self.key);
        std::fs::write(&meta_path, serde_json::to_vec(&info)?)
            .map_err(|e| NoteDropError::io(&meta_path, e))?;

        let target = self.store.object_path(&self.key);
        std::fs::rename(&self.partial, &target).map_err(|e| NoteDropError::io(&target, e))?;
        Ok(())
    }
}

impl Drop for FsObjectWriter<'_> {
    fn drop(&mut self) {
        // No-op after a successful close: the partial file was renamed away
        let _ = std::fs::remove_file(&self.partial);
    }
}

static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

/// Hidden scratch file name, unique within this process and across processes.
fn temp_name(stem: &str) -> String {
    let serial = NEXT_TEMP.fetch_add(1, Ordering::Relaxed);
    format!(".{stem}.{}-{serial}.partial", std::process::id())
}

/// Map a key to a file name that cannot escape the bucket directory.
///
/// Plain keys are used as-is; anything else is hex-encoded behind an `x-` prefix.
fn file_name_for(key: &str) -> String {
    let plain = !key.is_empty()
        && !key.starts_with('.')
        && !key.starts_with("x-")
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'@' | b'+' | b'='));
    if plain {
        key.to_string()
    } else {
        format!("x-{}", hex::encode(key.as_bytes()))
    }
}
