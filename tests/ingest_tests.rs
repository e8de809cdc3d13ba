//! End-to-end ingestion tests over the in-memory and filesystem stores.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use predicates::prelude::*;

use notedrop::error::NoteDropError;
use notedrop::model::identity::UserIdentity;
use notedrop::model::part::PartKind;
use notedrop::pipeline::classify::classify_media_type;
use notedrop::pipeline::rewrite::ReferenceRewriter;
use notedrop::pipeline::Ingestor;
use notedrop::store::fs::{FsNoteStore, FsObjectStore, FsTokenStore};
use notedrop::store::memory::{FaultPoint, MemoryNoteStore, MemoryObjectStore, MemoryTokenStore};
use notedrop::store::{NoteStore, ObjectStore, TokenStore};

const TOKEN: &str = "0123456789abcdef01234567";
const BASE_URL: &str = "https://storage.example.com/notes-bucket";

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

fn alice() -> UserIdentity {
    UserIdentity::new("alice@example.com")
}

/// In-memory stores with `TOKEN` already bound to alice.
struct Harness {
    tokens: MemoryTokenStore,
    notes: MemoryNoteStore,
    objects: MemoryObjectStore,
}

impl Harness {
    fn new() -> Self {
        Self::with_objects(MemoryObjectStore::new("notes-bucket"))
    }

    fn with_objects(objects: MemoryObjectStore) -> Self {
        let tokens = MemoryTokenStore::new();
        tokens.insert_if_absent(&alice(), TOKEN).unwrap();
        Self {
            tokens,
            notes: MemoryNoteStore::new(),
            objects,
        }
    }

    fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(
            &self.tokens,
            &self.notes,
            &self.objects,
            ReferenceRewriter::new(BASE_URL),
        )
    }
}

// ─── Plain note ─────────────────────────────────────────────────────

#[test]
fn test_plain_text_message_creates_one_note() {
    let h = Harness::new();
    let report = h.ingestor().ingest(&read_fixture("plain.eml")).unwrap();

    assert_eq!(report.parts, 1);
    assert_eq!(report.notes, 1);
    assert!(report.attachments.is_empty());
    assert!(h.objects.is_empty());

    let notes = h.notes.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].author, Some(alice()));
    assert_eq!(notes[0].content.trim_end(), "buy milk");
}

// ─── Inline reference ───────────────────────────────────────────────

#[test]
fn test_inline_image_is_stored_and_referenced() {
    let h = Harness::new();
    let report = h.ingestor().ingest(&read_fixture("inline_image.eml")).unwrap();

    assert_eq!(report.attachments, vec!["cid.abc123".to_string()]);
    assert_eq!(h.objects.get("cid.abc123").unwrap(), b"\x89PNG\r\n\x1a\n");
    assert!(h.objects.is_public());

    let notes = h.notes.all();
    assert_eq!(notes.len(), 1);
    let expected = format!("{BASE_URL}/cid.abc123");
    assert!(notes[0].content.contains(&expected), "{}", notes[0].content);
    assert!(!notes[0].content.contains("cid:"));
}

#[test]
fn test_rewritten_reference_matches_stored_object_url() {
    let h = Harness::new();
    let rewriter = ReferenceRewriter::new(BASE_URL);
    let report = h.ingestor().ingest(&read_fixture("inline_image.eml")).unwrap();

    let key = &report.attachments[0];
    assert_eq!(rewriter.rewrite("cid:abc123"), rewriter.url_for(key));
    assert_eq!(rewriter.url_for(key), format!("{BASE_URL}/cid.abc123"));
}

#[test]
fn test_alternative_html_references_sibling_jpeg() {
    let h = Harness::new();
    let rewriter = ReferenceRewriter::new(BASE_URL);
    let report = h
        .ingestor()
        .ingest(&read_fixture("alternative_inline.eml"))
        .unwrap();

    assert_eq!(report.parts, 3);
    assert_eq!(report.notes, 1);
    assert_eq!(report.attachments, vec!["cid.img1".to_string()]);
    assert!(report.is_complete());
    assert_eq!(h.objects.get("cid.img1").unwrap(), b"\xFF\xD8\xFF\xE0\x00");

    let notes = h.notes.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(
        notes[0].content,
        format!(r#"<p>the beach</p><img src="{}">"#, rewriter.url_for("cid.img1"))
    );
}

// ─── Unknown recipient ──────────────────────────────────────────────

#[test]
fn test_unknown_recipient_writes_nothing() {
    let h = Harness::new();
    let err = h
        .ingestor()
        .ingest(&read_fixture("unknown_recipient.eml"))
        .unwrap_err();

    assert!(matches!(err, NoteDropError::UnknownRecipient(ref t) if t == "ffffffffffffffffffffffff"));
    assert!(err.is_message_fatal());
    assert!(h.notes.all().is_empty());
    assert!(h.objects.is_empty());
    assert!(!h.objects.is_public());
}

// ─── Partial failure ────────────────────────────────────────────────

#[test]
fn test_attachment_write_failure_keeps_the_note() {
    let h = Harness::with_objects(MemoryObjectStore::failing_at("notes-bucket", FaultPoint::Write));
    let report = h.ingestor().ingest(&read_fixture("mixed_with_pdf.eml")).unwrap();

    assert_eq!(report.notes, 1);
    assert!(report.attachments.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].section, "2");
    assert_eq!(report.failures[0].kind, PartKind::Binary);
    assert!(h.objects.is_empty());
    assert_eq!(h.notes.all()[0].content, "<p>quarterly report attached</p>");
}

#[test]
fn test_access_rule_failure_aborts_the_attachment() {
    let h = Harness::with_objects(MemoryObjectStore::failing_at(
        "notes-bucket",
        FaultPoint::AccessRule,
    ));
    let report = h.ingestor().ingest(&read_fixture("inline_image.eml")).unwrap();

    assert_eq!(report.notes, 1);
    assert!(report.failures[0].error.contains("public-read"));
    assert!(h.objects.is_empty());
}

// ─── Alternative preference ─────────────────────────────────────────

#[test]
fn test_alternative_prefers_html() {
    let h = Harness::new();
    let report = h.ingestor().ingest(&read_fixture("alternative.eml")).unwrap();

    assert_eq!(report.parts, 2);
    assert_eq!(report.notes, 1);
    assert_eq!(h.notes.all()[0].content, r#"<p style="x">see the cat</p>"#);
}

#[test]
fn test_mixed_message_routes_every_part() {
    let h = Harness::new();
    let report = h.ingestor().ingest(&read_fixture("mixed_with_pdf.eml")).unwrap();

    assert_eq!(report.parts, 3);
    assert_eq!(report.notes, 1);
    assert_eq!(report.attachments.len(), 1);
    assert!(report.attachments[0].starts_with("att."));
    assert_eq!(h.objects.get(&report.attachments[0]).unwrap(), b"%PDF-1.4\n");
    assert!(report.is_complete());
}

// ─── Tokens ─────────────────────────────────────────────────────────

#[test]
fn test_token_for_is_stable_and_routes_mail() {
    let tokens = MemoryTokenStore::new();
    let notes = MemoryNoteStore::new();
    let objects = MemoryObjectStore::new("b");
    let ingestor = Ingestor::new(&tokens, &notes, &objects, ReferenceRewriter::new(BASE_URL));

    let bob = UserIdentity::new("bob@example.com");
    let token = ingestor.token_for(&bob).unwrap();
    assert_eq!(ingestor.token_for(&bob).unwrap(), token);

    let raw = format!("To: {token}@notes.example.com\r\n\r\nhello bob");
    ingestor.ingest(raw.as_bytes()).unwrap();
    assert_eq!(notes.recent_by_author(&bob, 10).unwrap().len(), 1);
}

#[test]
fn test_empty_or_unknown_media_type_is_binary() {
    assert_eq!(classify_media_type(""), PartKind::Binary);
    assert_eq!(classify_media_type("not a type"), PartKind::Binary);
}

// ─── Filesystem backends ────────────────────────────────────────────

#[test]
fn test_ingest_into_filesystem_stores() {
    let root = assert_fs::TempDir::new().unwrap();
    let tokens = FsTokenStore::open(root.path()).unwrap();
    let notes = FsNoteStore::open(root.path()).unwrap();
    let objects = FsObjectStore::open(root.path(), "notes-bucket").unwrap();
    tokens.insert_if_absent(&alice(), TOKEN).unwrap();

    let ingestor = Ingestor::new(&tokens, &notes, &objects, ReferenceRewriter::new(BASE_URL));
    let report = ingestor.ingest(&read_fixture("inline_image.eml")).unwrap();
    assert!(report.is_complete());

    root.child("notes.jsonl")
        .assert(predicate::str::contains("cid.abc123"));
    root.child("objects/notes-bucket/cid.abc123")
        .assert(predicate::path::is_file());
    root.child("objects/notes-bucket/.acl.json")
        .assert(predicate::str::contains("allUsers"));

    let info = objects.stat("cid.abc123").unwrap().unwrap();
    assert_eq!(info.size, 8);
    assert_eq!(info.media_type, "image/png");

    let recent = notes.recent_by_author(&alice(), 10).unwrap();
    assert_eq!(recent.len(), 1);
}

#[test]
fn test_filesystem_unknown_recipient_leaves_no_files() {
    let root = assert_fs::TempDir::new().unwrap();
    let tokens = FsTokenStore::open(root.path()).unwrap();
    let notes = FsNoteStore::open(root.path()).unwrap();
    let objects = FsObjectStore::open(root.path(), "notes-bucket").unwrap();

    let ingestor = Ingestor::new(&tokens, &notes, &objects, ReferenceRewriter::new(BASE_URL));
    assert!(ingestor.ingest(&read_fixture("unknown_recipient.eml")).is_err());

    root.child("notes.jsonl").assert(predicate::path::missing());
    root.child("objects/notes-bucket/cid.payload")
        .assert(predicate::path::missing());
}
