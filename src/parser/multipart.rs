//! Multipart walker: flattens a MIME tree into its leaf sections in wire order.

use std::io::Read;

use memchr::memmem;
use tracing::trace;

use crate::error::{NoteDropError, Result};
use crate::model::part::{section_label, MailPart};
use crate::parser::header::{parse_headers, split_header_body};
use crate::parser::media_type::MediaType;

/// Maximum depth for recursive multipart parsing (to prevent stack overflow on adversarial input).
pub const MAX_DEPTH: usize = 16;

/// Content type of a section that declares none (RFC 2045 §5.2).
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=us-ascii";

/// Read a multipart body to the end and flatten it into leaf parts.
///
/// `content_type` is the declared `Content-Type` of the body. Single-part
/// bodies are rejected with [`NoteDropError::NotAContainer`]; callers treat
/// those as a leaf themselves.
pub fn walk<R: Read>(mut body: R, content_type: &str) -> Result<Vec<MailPart>> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .map_err(|e| NoteDropError::io("<message body>", e))?;
    walk_bytes(&buf, content_type)
}

/// Flatten an in-memory multipart body into leaf parts, in wire order.
///
/// Nested containers are expanded in place, so the result holds exactly one
/// [`MailPart`] per leaf section of the tree.
pub fn walk_bytes(body: &[u8], content_type: &str) -> Result<Vec<MailPart>> {
    let media_type = MediaType::parse(content_type)?;
    if !media_type.is_multipart() {
        return Err(NoteDropError::NotAContainer(media_type.essence().to_string()));
    }
    walk_container(body, &media_type, &[], None, 0)
}

fn walk_container(
    body: &[u8],
    media_type: &MediaType,
    path: &[usize],
    alternative: Option<&[usize]>,
    depth: usize,
) -> Result<Vec<MailPart>> {
    if depth >= MAX_DEPTH {
        return Err(NoteDropError::NestingTooDeep(MAX_DEPTH));
    }
    let boundary = media_type
        .boundary()
        .ok_or_else(|| NoteDropError::MissingBoundary(media_type.to_string()))?;

    // Children of an alternative container are tagged with its path
    let alternative = if media_type.essence() == "multipart/alternative" {
        Some(path)
    } else {
        alternative
    };

    let mut leaves = Vec::new();

    for (index, section) in split_sections(body, boundary)?.into_iter().enumerate() {
        let mut section_path = path.to_vec();
        section_path.push(index + 1);
        let label = section_label(&section_path);

        let (raw_headers, payload) =
            split_header_body(section).ok_or_else(|| NoteDropError::MalformedHeaders {
                section: label.clone(),
                reason: "header block is not terminated by a blank line".into(),
            })?;
        let headers = parse_headers(raw_headers, &label)?;
        let declared = headers.get("content-type").unwrap_or(DEFAULT_CONTENT_TYPE);

        if let Ok(nested) = MediaType::parse(declared) {
            if nested.is_multipart() {
                trace!(section = %label, media_type = %nested.essence(), "Descending into nested multipart");
                leaves.extend(walk_container(
                    payload,
                    &nested,
                    &section_path,
                    alternative,
                    depth + 1,
                )?);
                continue;
            }
        }

        trace!(section = %label, media_type = declared, size = payload.len(), "Leaf section");
        leaves.push(MailPart {
            media_type: declared.to_string(),
            payload: payload.to_vec(),
            content_id: non_empty(headers.get("content-id")),
            transfer_encoding: non_empty(headers.get("content-transfer-encoding")),
            disposition: non_empty(headers.get("content-disposition")),
            path: section_path,
            alternative: alternative.map(<[usize]>::to_vec),
        });
    }

    Ok(leaves)
}

/// Cut a multipart body into the raw sections between delimiter lines.
///
/// The line break preceding a delimiter belongs to the delimiter. Preamble
/// and epilogue are dropped.
fn split_sections<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let dash_boundary = format!("--{boundary}");
    let needle = format!("\n{dash_boundary}");

    let mut candidates = Vec::new();
    if body.starts_with(dash_boundary.as_bytes()) {
        candidates.push(0);
    }
    candidates.extend(memmem::find_iter(body, needle.as_bytes()).map(|pos| pos + 1));

    let mut sections = Vec::new();
    let mut open: Option<usize> = None;
    let mut closed = false;

    for start in candidates {
        let after = start + dash_boundary.len();
        let rest = &body[after..];
        let is_close = rest.starts_with(b"--");
        let tail = if is_close { &rest[2..] } else { rest };

        // Transport padding, then end of line
        let padding = tail
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        let line_end = match &tail[padding..] {
            [] => 0,
            [b'\n', ..] => 1,
            [b'\r', b'\n', ..] => 2,
            // `--boundaryX`: body text that merely starts like a delimiter
            _ if !is_close => continue,
            _ => 0,
        };

        if let Some(content_start) = open {
            let mut end = start - 1;
            if end > content_start && body[end - 1] == b'\r' {
                end -= 1;
            }
            sections.push(&body[content_start..end.max(content_start)]);
        }

        if is_close {
            closed = true;
            break;
        }
        open = Some(after + padding + line_end);
    }

    if open.is_none() {
        return Err(NoteDropError::MissingDelimiter(boundary.to_string()));
    }
    if !closed {
        return Err(NoteDropError::UnterminatedMultipart(boundary.to_string()));
    }
    Ok(sections)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
