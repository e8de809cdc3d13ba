//! Building a note from the textual renderings of a message.

use crate::error::Result;
use crate::model::identity::UserIdentity;
use crate::model::note::Note;
use crate::model::part::{MailPart, PartKind};
use crate::parser::media_type::MediaType;
use crate::parser::{multipart, transfer};

use super::classify::classify;
use super::rewrite::ReferenceRewriter;

/// Picks the richest rendering among textual parts and turns it into a note.
pub struct NoteAssembler<'a> {
    rewriter: &'a ReferenceRewriter,
}

impl<'a> NoteAssembler<'a> {
    pub fn new(rewriter: &'a ReferenceRewriter) -> Self {
        Self { rewriter }
    }

    /// Assemble one note from equivalent textual parts.
    ///
    /// A `multipart/alternative` part among `parts` is walked and its leaves
    /// join the candidates. The chosen body is decoded and its `cid:`
    /// references rewritten. No candidates yields an empty note.
    pub fn assemble(&self, parts: &[MailPart], author: &UserIdentity) -> Result<Note> {
        let candidates = expand_alternatives(parts)?;
        let content = match select(&candidates) {
            Some(part) => self.render(part)?,
            None => String::new(),
        };
        Ok(Note::from_mail(author.clone(), content))
    }

    fn render(&self, part: &MailPart) -> Result<String> {
        let charset = MediaType::parse(&part.media_type)
            .ok()
            .and_then(|mt| mt.charset().map(str::to_string));
        let text = transfer::decode_text(
            &part.payload,
            part.transfer_encoding.as_deref(),
            charset.as_deref(),
        )?;
        Ok(self.rewriter.rewrite(&text))
    }
}

/// Preferred rendering: `text/html`, then `text/plain`, then the first
/// textual candidate, then whatever comes first.
pub fn select(candidates: &[MailPart]) -> Option<&MailPart> {
    let essences: Vec<Option<String>> = candidates
        .iter()
        .map(|p| MediaType::parse(&p.media_type).ok().map(|mt| mt.essence().to_string()))
        .collect();
    let by_essence = |wanted: &str| {
        essences
            .iter()
            .position(|e| e.as_deref() == Some(wanted))
            .map(|i| &candidates[i])
    };

    by_essence("text/html")
        .or_else(|| by_essence("text/plain"))
        .or_else(|| candidates.iter().find(|p| classify(p) == PartKind::Textual))
        .or_else(|| candidates.first())
}

fn expand_alternatives(parts: &[MailPart]) -> Result<Vec<MailPart>> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let is_alternative = MediaType::parse(&part.media_type)
            .map(|mt| mt.essence() == "multipart/alternative")
            .unwrap_or(false);
        if is_alternative {
            out.extend(multipart::walk_bytes(&part.payload, &part.media_type)?);
        } else {
            out.push(part.clone());
        }
    }
    Ok(out)
}
