//! Textual vs binary routing of leaf parts.

use crate::model::part::{MailPart, PartKind};
use crate::parser::media_type::MediaType;

/// Route a part: `text/*` and `multipart/alternative` become note content,
/// everything else (including empty or unparsable types) is an attachment.
pub fn classify(part: &MailPart) -> PartKind {
    classify_media_type(&part.media_type)
}

/// [`classify`] on a bare `Content-Type` value.
pub fn classify_media_type(raw: &str) -> PartKind {
    match MediaType::parse(raw) {
        Ok(mt) if mt.main_type() == "text" || mt.essence() == "multipart/alternative" => {
            PartKind::Textual
        }
        _ => PartKind::Binary,
    }
}
