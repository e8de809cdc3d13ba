//! Mail-to-note ingestion.
//!
//! One [`Ingestor::ingest`] call handles one inbound message:
//!
//! 1. resolve the recipient token to an author (unknown tokens are dropped),
//! 2. flatten the body into leaf parts (any parse error drops the message
//!    before anything is written),
//! 3. route each leaf, in wire order: textual renderings become notes,
//!    everything else is stored as a public attachment.
//!
//! Store failures in step 3 are contained to the part that raised them.

pub mod assemble;
pub mod attachment;
pub mod classify;
pub mod resolver;
pub mod rewrite;

use std::io::Read;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NoteDropError, Result};
use crate::model::identity::UserIdentity;
use crate::model::note::Note;
use crate::model::part::{section_label, MailPart, PartKind};
use crate::parser::envelope::Envelope;
use crate::parser::media_type::MediaType;
use crate::parser::multipart;
use crate::store::{NoteStore, ObjectStore, TokenStore};

use assemble::NoteAssembler;
use attachment::AttachmentStore;
use classify::classify;
use resolver::{token_from_recipient, AddressResolver};
use rewrite::ReferenceRewriter;

/// A part that could not be stored.
#[derive(Debug, Clone, Serialize)]
pub struct PartFailure {
    /// Dotted section number (`"0"` for a single-part body).
    pub section: String,
    pub kind: PartKind,
    pub error: String,
}

/// Outcome of ingesting one message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Resolved author.
    pub author: Option<UserIdentity>,
    /// Leaf parts found in the body.
    pub parts: usize,
    /// Notes written.
    pub notes: usize,
    /// Keys of stored attachments, in wire order.
    pub attachments: Vec<String>,
    /// Textual renderings that decoded to nothing and were not saved.
    pub skipped_empty: usize,
    pub failures: Vec<PartFailure>,
}

impl IngestReport {
    /// `true` when every part was stored.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Request-scoped ingestion flow over a set of stores.
pub struct Ingestor<'a> {
    resolver: AddressResolver<'a>,
    notes: &'a dyn NoteStore,
    attachments: AttachmentStore<'a>,
    rewriter: ReferenceRewriter,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        tokens: &'a dyn TokenStore,
        notes: &'a dyn NoteStore,
        objects: &'a dyn ObjectStore,
        rewriter: ReferenceRewriter,
    ) -> Self {
        Self {
            resolver: AddressResolver::new(tokens),
            notes,
            attachments: AttachmentStore::new(objects),
            rewriter,
        }
    }

    /// Ingest a complete raw message. The first `To:` address carries the
    /// token.
    ///
    /// Errors mean the message was dropped with nothing written.
    pub fn ingest(&self, raw: &[u8]) -> Result<IngestReport> {
        let result = Envelope::parse(raw).and_then(|envelope| {
            let message_id = envelope.message_id.clone().unwrap_or_default();
            debug!(message_id = %message_id, content_type = %envelope.content_type, "Message received");
            let recipient = envelope
                .recipient
                .clone()
                .ok_or(NoteDropError::MissingRecipient)?;
            let author = self.authorize(&recipient)?;
            let parts = decompose(envelope)?;
            Ok(self.route(parts, author))
        });
        log_dropped(result)
    }

    /// Ingest a body whose recipient and `Content-Type` were already
    /// extracted by the transport.
    pub fn ingest_body<R: Read>(
        &self,
        recipient: &str,
        content_type: &str,
        mut body: R,
    ) -> Result<IngestReport> {
        let result = self.authorize(recipient).and_then(|author| {
            let parts = if MediaType::parse(content_type)?.is_multipart() {
                multipart::walk(body, content_type)?
            } else {
                let mut payload = Vec::new();
                body.read_to_end(&mut payload)
                    .map_err(|e| NoteDropError::io("<message body>", e))?;
                vec![MailPart::new(content_type, payload)]
            };
            Ok(self.route(parts, author))
        });
        log_dropped(result)
    }

    /// Token of `identity`, minted on first use. This is the address users
    /// mail their notes to.
    pub fn token_for(&self, identity: &UserIdentity) -> Result<String> {
        self.resolver.token_for(identity)
    }

    fn authorize(&self, recipient: &str) -> Result<UserIdentity> {
        let token = token_from_recipient(recipient).ok_or(NoteDropError::MissingRecipient)?;
        self.resolver
            .resolve(token)?
            .ok_or_else(|| NoteDropError::UnknownRecipient(token.to_string()))
    }

    /// Route parts in wire order. Consecutive textual parts of one
    /// `multipart/alternative` container are assembled into a single note.
    fn route(&self, parts: Vec<MailPart>, author: UserIdentity) -> IngestReport {
        let mut report = IngestReport {
            parts: parts.len(),
            ..Default::default()
        };
        let mut group: Vec<MailPart> = Vec::new();

        for part in parts {
            let in_group = match (group.first(), &part.alternative) {
                (Some(head), Some(alt)) => head.alternative.as_ref() == Some(alt),
                _ => false,
            };
            if !in_group && !group.is_empty() {
                self.save_note(&std::mem::take(&mut group), &author, &mut report);
            }

            match classify(&part) {
                PartKind::Textual if part.alternative.is_some() => group.push(part),
                PartKind::Textual => self.save_note(std::slice::from_ref(&part), &author, &mut report),
                PartKind::Binary => self.save_attachment(&part, &mut report),
            }
        }
        if !group.is_empty() {
            self.save_note(&group, &author, &mut report);
        }

        info!(
            author = %author,
            parts = report.parts,
            notes = report.notes,
            attachments = report.attachments.len(),
            failures = report.failures.len(),
            "Message ingested"
        );
        report.author = Some(author);
        report
    }

    fn save_note(&self, parts: &[MailPart], author: &UserIdentity, report: &mut IngestReport) {
        let section = parts
            .first()
            .map(|p| section_label(p.alternative.as_deref().unwrap_or(&p.path)))
            .unwrap_or_else(|| "0".to_string());

        let saved = NoteAssembler::new(&self.rewriter)
            .assemble(parts, author)
            .and_then(|note| {
                if note.content.trim().is_empty() {
                    return Err(NoteDropError::EmptyNote);
                }
                self.notes.insert(&note)
            });

        match saved {
            Ok(()) => {
                debug!(section = %section, "Note saved");
                report.notes += 1;
            }
            Err(NoteDropError::EmptyNote) => {
                debug!(section = %section, "Skipping empty rendering");
                report.skipped_empty += 1;
            }
            Err(e) => {
                warn!(section = %section, error = %e, "Could not save note");
                report.failures.push(PartFailure {
                    section,
                    kind: PartKind::Textual,
                    error: e.to_string(),
                });
            }
        }
    }

    fn save_attachment(&self, part: &MailPart, report: &mut IngestReport) {
        match self.attachments.store(part) {
            Ok(key) => report.attachments.push(key),
            Err(e) => {
                warn!(section = %part.section(), error = %e, "Could not store attachment");
                report.failures.push(PartFailure {
                    section: part.section(),
                    kind: PartKind::Binary,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Persist a note submitted through the web form. Anonymous when `author`
/// is `None`; blank text is rejected.
pub fn submit_web_note(
    notes: &dyn NoteStore,
    author: Option<UserIdentity>,
    text: &str,
) -> Result<Note> {
    if text.trim().is_empty() {
        return Err(NoteDropError::EmptyNote);
    }
    let note = Note::from_web(author, text.to_string());
    notes.insert(&note)?;
    info!(anonymous = note.author.is_none(), "Web note saved");
    Ok(note)
}

/// Leaf parts of a parsed message; a single-part body is its own leaf.
/// An unparsable top-level `Content-Type` drops the message.
fn decompose(envelope: Envelope) -> Result<Vec<MailPart>> {
    if MediaType::parse(&envelope.content_type)?.is_multipart() {
        multipart::walk_bytes(&envelope.body, &envelope.content_type)
    } else {
        Ok(vec![envelope.into_single_part()])
    }
}

fn log_dropped(result: Result<IngestReport>) -> Result<IngestReport> {
    if let Err(e) = &result {
        warn!(error = %e, "Message dropped");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FaultPoint, MemoryNoteStore, MemoryObjectStore, MemoryTokenStore};

    const BASE: &str = "https://cdn.example.com/notes";

    struct Fixture {
        tokens: MemoryTokenStore,
        notes: MemoryNoteStore,
        objects: MemoryObjectStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_objects(MemoryObjectStore::new("notes"))
        }

        fn with_objects(objects: MemoryObjectStore) -> Self {
            Self {
                tokens: MemoryTokenStore::new(),
                notes: MemoryNoteStore::new(),
                objects,
            }
        }

        fn ingestor(&self) -> Ingestor<'_> {
            Ingestor::new(
                &self.tokens,
                &self.notes,
                &self.objects,
                ReferenceRewriter::new(BASE),
            )
        }
    }

    fn alice() -> UserIdentity {
        UserIdentity::new("alice@example.com")
    }

    #[test]
    fn test_single_part_message() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let raw = format!("To: {token}@notes.example.com\r\nContent-Type: text/plain\r\n\r\nbuy milk");

        let report = ing.ingest(raw.as_bytes()).unwrap();
        assert_eq!(report.notes, 1);
        assert_eq!(report.author, Some(alice()));
        assert_eq!(fx.notes.all()[0].content, "buy milk");
    }

    #[test]
    fn test_missing_recipient_drops_message() {
        let fx = Fixture::new();
        let err = fx.ingestor().ingest(b"Subject: x\r\n\r\nbody").unwrap_err();
        assert!(matches!(err, NoteDropError::MissingRecipient));
        assert!(fx.notes.all().is_empty());
    }

    #[test]
    fn test_parse_error_writes_nothing() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        // First section is fine, but the body is never terminated
        let raw = format!(
            "To: {token}@x\r\nContent-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nhello\r\n\
--b\r\nContent-Type: image/png\r\n\r\nxx\r\n"
        );
        let err = ing.ingest(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, NoteDropError::UnterminatedMultipart(_)));
        assert!(fx.notes.all().is_empty());
        assert!(fx.objects.is_empty());
    }

    #[test]
    fn test_malformed_content_type_drops_message() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let raw = format!(
            "To: {token}@x\r\nContent-Type: multipart/mixed boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nhello\r\n--b--\r\n"
        );
        let err = ing.ingest(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, NoteDropError::InvalidMediaType(_)));
        assert!(err.is_message_fatal());
        assert!(fx.notes.all().is_empty());
        assert!(fx.objects.is_empty());

        let err = ing
            .ingest_body(&token, "text/plain; charset", &b"hello"[..])
            .unwrap_err();
        assert!(matches!(err, NoteDropError::InvalidMediaType(_)));
        assert!(fx.notes.all().is_empty());
        assert!(fx.objects.is_empty());
    }

    #[test]
    fn test_ingest_body_with_transport_fields() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let body = b"--z\r\nContent-Type: text/plain\r\n\r\nnote\r\n--z\r\nContent-Type: application/pdf\r\n\r\n%PDF\r\n--z--\r\n";
        let report = ing
            .ingest_body(&format!("{token}%40notes.example.com"), "multipart/mixed; boundary=z", &body[..])
            .unwrap();
        assert_eq!(report.parts, 2);
        assert_eq!(report.notes, 1);
        assert_eq!(report.attachments.len(), 1);
        assert!(report.attachments[0].starts_with("att."));
    }

    #[test]
    fn test_empty_text_part_is_skipped() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let report = ing.ingest_body(&token, "text/plain", &b"  \r\n"[..]).unwrap();
        assert_eq!(report.notes, 0);
        assert_eq!(report.skipped_empty, 1);
        assert!(report.is_complete());
    }

    #[test]
    fn test_note_failure_is_contained() {
        let fx = Fixture::with_objects(MemoryObjectStore::failing_at("notes", FaultPoint::Close));
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let body = b"--z\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: x-unknown\r\n\r\nbad\r\n\
--z\r\nContent-Type: text/plain\r\n\r\ngood\r\n\
--z\r\nContent-Type: image/gif\r\n\r\nGIF89a\r\n--z--\r\n";
        let report = ing
            .ingest_body(&token, "multipart/mixed; boundary=z", &body[..])
            .unwrap();
        assert_eq!(report.notes, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].section, "1");
        assert_eq!(report.failures[0].kind, PartKind::Textual);
        assert_eq!(report.failures[1].section, "3");
        assert_eq!(report.failures[1].kind, PartKind::Binary);
        assert_eq!(fx.notes.all()[0].content, "good");
    }

    #[test]
    fn test_two_alternative_groups_make_two_notes() {
        let fx = Fixture::new();
        let ing = fx.ingestor();
        let token = ing.token_for(&alice()).unwrap();
        let body = b"--o\r\nContent-Type: multipart/alternative; boundary=a1\r\n\r\n\
--a1\r\nContent-Type: text/plain\r\n\r\none\r\n--a1\r\nContent-Type: text/html\r\n\r\n<b>one</b>\r\n--a1--\r\n\
--o\r\nContent-Type: multipart/alternative; boundary=a2\r\n\r\n\
--a2\r\nContent-Type: text/plain\r\n\r\ntwo\r\n--a2\r\nContent-Type: text/html\r\n\r\n<b>two</b>\r\n--a2--\r\n\
--o--\r\n";
        let report = ing
            .ingest_body(&token, "multipart/mixed; boundary=o", &body[..])
            .unwrap();
        assert_eq!(report.parts, 4);
        assert_eq!(report.notes, 2);
        let contents: Vec<String> = fx.notes.all().into_iter().map(|n| n.content).collect();
        assert_eq!(contents, vec!["<b>one</b>", "<b>two</b>"]);
    }

    #[test]
    fn test_submit_web_note() {
        let store = MemoryNoteStore::new();
        let note = submit_web_note(&store, None, "anonymous thought").unwrap();
        assert!(note.author.is_none());
        assert_eq!(note.source, crate::model::note::NoteSource::Web);
        assert!(matches!(
            submit_web_note(&store, Some(alice()), "   "),
            Err(NoteDropError::EmptyNote)
        ));
        assert_eq!(store.all().len(), 1);
    }
}
