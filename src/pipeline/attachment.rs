//! Persisting binary parts as public objects.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{NoteDropError, Result};
use crate::model::part::MailPart;
use crate::parser::transfer;
use crate::store::ObjectStore;

use super::rewrite::CID_KEY_PREFIX;

/// Media type recorded for parts that declare none.
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Hex digits of the payload hash in a time-derived key.
const HASH_PREFIX_LEN: usize = 12;

/// Writes binary parts to an [`ObjectStore`].
pub struct AttachmentStore<'a> {
    objects: &'a dyn ObjectStore,
}

impl<'a> AttachmentStore<'a> {
    pub fn new(objects: &'a dyn ObjectStore) -> Self {
        Self { objects }
    }

    /// Store one part and return its key.
    ///
    /// Stages run in order and each maps to its own error variant: decode,
    /// open, public-read rule, write, close, finalize. The object only counts
    /// as stored once the finalize check sees it with the expected size.
    pub fn store(&self, part: &MailPart) -> Result<String> {
        let data = transfer::decode(&part.payload, part.transfer_encoding.as_deref())?;
        let key = storage_key(part, &data);
        let media_type = match part.media_type.trim() {
            "" => FALLBACK_MEDIA_TYPE,
            declared => declared,
        };
        debug!(key = %key, media_type, bytes = data.len(), "Storing attachment");

        let mut writer =
            self.objects
                .open_writer(&key, media_type)
                .map_err(|e| NoteDropError::ObjectOpen {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;

        self.objects
            .set_public_read()
            .map_err(|e| NoteDropError::AccessRule {
                bucket: self.objects.bucket().to_string(),
                reason: e.to_string(),
            })?;

        writer
            .write_all(&data)
            .map_err(|e| NoteDropError::ObjectWrite {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        writer.close().map_err(|e| NoteDropError::ObjectClose {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        self.finalize(&key, data.len() as u64)?;
        info!(key = %key, bucket = self.objects.bucket(), bytes = data.len(), "Attachment stored");
        Ok(key)
    }

    fn finalize(&self, key: &str, expected: u64) -> Result<()> {
        let failed = |reason: String| NoteDropError::ObjectFinalize {
            key: key.to_string(),
            reason,
        };
        match self.objects.stat(key) {
            Ok(Some(info)) if info.size == expected => Ok(()),
            Ok(Some(info)) => Err(failed(format!(
                "stored {} bytes, expected {expected}",
                info.size
            ))),
            Ok(None) => Err(failed("object not found after close".into())),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}

/// Key for a part: `cid.<id>` when it has a usable `Content-ID`, otherwise
/// a time-derived key disambiguated by the payload hash.
pub fn storage_key(part: &MailPart, decoded: &[u8]) -> String {
    part.content_id
        .as_deref()
        .and_then(key_for_content_id)
        .unwrap_or_else(|| time_derived_key(decoded))
}

/// `cid.` plus the content-id without angle brackets, quotes or whitespace.
/// `None` when nothing is left.
pub fn key_for_content_id(content_id: &str) -> Option<String> {
    let id = content_id.trim_matches(|c: char| c == '<' || c == '>' || c == '"' || c.is_whitespace());
    (!id.is_empty()).then(|| format!("{CID_KEY_PREFIX}{id}"))
}

fn time_derived_key(decoded: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(decoded));
    format!(
        "att.{}.{}",
        Utc::now().format("%Y%m%dT%H%M%S%.9f"),
        &digest[..HASH_PREFIX_LEN]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FaultPoint, MemoryObjectStore};

    fn png_part() -> MailPart {
        MailPart::new("image/png", b"iVBORw0KGgo=".to_vec())
            .with_content_id("<abc123>")
            .with_transfer_encoding("base64")
    }

    #[test]
    fn test_store_under_content_id_key() {
        let objects = MemoryObjectStore::new("notes");
        let key = AttachmentStore::new(&objects).store(&png_part()).unwrap();
        assert_eq!(key, "cid.abc123");
        assert_eq!(objects.get("cid.abc123").unwrap(), b"\x89PNG\r\n\x1a\n");
        assert!(objects.is_public());
        assert_eq!(objects.stat(&key).unwrap().unwrap().media_type, "image/png");
    }

    #[test]
    fn test_key_for_content_id_trims_decoration() {
        assert_eq!(key_for_content_id("<abc123>").as_deref(), Some("cid.abc123"));
        assert_eq!(key_for_content_id(" \"<x@host>\" ").as_deref(), Some("cid.x@host"));
        assert_eq!(key_for_content_id("<>"), None);
        assert_eq!(key_for_content_id("   "), None);
    }

    #[test]
    fn test_time_derived_key_without_content_id() {
        let part = MailPart::new("application/pdf", b"%PDF-1.4".to_vec());
        let key = storage_key(&part, &part.payload);
        assert!(key.starts_with("att."));
        let digest = hex::encode(Sha256::digest(b"%PDF-1.4"));
        assert!(key.ends_with(&digest[..HASH_PREFIX_LEN]));
    }

    #[test]
    fn test_different_payloads_get_different_fallback_keys() {
        let a = storage_key(&MailPart::new("x/y", b"a".to_vec()), b"a");
        let b = storage_key(&MailPart::new("x/y", b"b".to_vec()), b"b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_media_type_stored_as_octet_stream() {
        let objects = MemoryObjectStore::new("notes");
        let part = MailPart::new("", b"raw".to_vec()).with_content_id("<r>");
        AttachmentStore::new(&objects).store(&part).unwrap();
        assert_eq!(
            objects.stat("cid.r").unwrap().unwrap().media_type,
            FALLBACK_MEDIA_TYPE
        );
    }

    #[test]
    fn test_each_stage_has_its_own_error() {
        let cases = [
            (FaultPoint::Open, "ObjectOpen"),
            (FaultPoint::AccessRule, "AccessRule"),
            (FaultPoint::Write, "ObjectWrite"),
            (FaultPoint::Close, "ObjectClose"),
            (FaultPoint::Finalize, "ObjectFinalize"),
        ];
        for (fault, expected) in cases {
            let objects = MemoryObjectStore::failing_at("notes", fault);
            let err = AttachmentStore::new(&objects).store(&png_part()).unwrap_err();
            let matched = match &err {
                NoteDropError::ObjectOpen { .. } => "ObjectOpen",
                NoteDropError::AccessRule { .. } => "AccessRule",
                NoteDropError::ObjectWrite { .. } => "ObjectWrite",
                NoteDropError::ObjectClose { .. } => "ObjectClose",
                NoteDropError::ObjectFinalize { .. } => "ObjectFinalize",
                _ => "other",
            };
            assert_eq!(matched, expected, "{fault:?}: {err}");
            assert!(objects.is_empty());
        }
    }

    #[test]
    fn test_bad_base64_fails_before_opening() {
        let objects = MemoryObjectStore::failing_at("notes", FaultPoint::Open);
        let part = MailPart::new("image/png", b"@@@".to_vec()).with_transfer_encoding("base64");
        let err = AttachmentStore::new(&objects).store(&part).unwrap_err();
        assert!(matches!(err, NoteDropError::Decode(_)));
    }

    #[test]
    fn test_unknown_transfer_encoding_rejected() {
        let objects = MemoryObjectStore::new("notes");
        let part = MailPart::new("image/png", b"x".to_vec()).with_transfer_encoding("x-uuencode");
        assert!(matches!(
            AttachmentStore::new(&objects).store(&part),
            Err(NoteDropError::Decode(_))
        ));
    }
}
