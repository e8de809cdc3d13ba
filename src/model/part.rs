//! One leaf of a decomposed message body.

/// A leaf MIME section produced by the multipart walker.
///
/// `media_type` and `payload` are always present. The payload is kept exactly
/// as it appeared on the wire (still transfer-encoded); decoding happens at
/// the consumer that needs the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPart {
    /// Full `Content-Type` header value, parameters included.
    pub media_type: String,

    /// Raw section body.
    pub payload: Vec<u8>,

    /// Raw `Content-ID` header value (e.g. `"<img1@host>"`).
    pub content_id: Option<String>,

    /// `Content-Transfer-Encoding` (`base64`, `quoted-printable`, `7bit`, ...).
    pub transfer_encoding: Option<String>,

    /// Raw `Content-Disposition` header value (`inline`, `attachment; filename=...`).
    pub disposition: Option<String>,

    /// 1-based section path, IMAP style: `[2, 1]` is the first child of the
    /// second top-level section.
    pub path: Vec<usize>,

    /// Section path of the nearest enclosing `multipart/alternative`
    /// container. Siblings sharing it are equivalent renderings.
    pub alternative: Option<Vec<usize>>,
}

impl MailPart {
    /// Build a bare leaf with only a media type and payload.
    pub fn new(media_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: media_type.into(),
            payload: payload.into(),
            content_id: None,
            transfer_encoding: None,
            disposition: None,
            path: Vec::new(),
            alternative: None,
        }
    }

    /// Attach a `Content-ID` header value.
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Attach a `Content-Transfer-Encoding` header value.
    pub fn with_transfer_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.transfer_encoding = Some(encoding.into());
        self
    }

    /// Human-readable section number (`"2.1"`), `"0"` for a bare body.
    pub fn section(&self) -> String {
        section_label(&self.path)
    }
}

/// Format a section path as dotted part numbers.
pub fn section_label(path: &[usize]) -> String {
    if path.is_empty() {
        return "0".to_string();
    }
    path.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Routing decision for a leaf part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    /// Note content (`text/*` or a `multipart/alternative` container).
    Textual,
    /// Opaque attachment bytes.
    Binary,
}
