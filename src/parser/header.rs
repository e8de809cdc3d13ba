//! RFC 5322 header blocks: splitting from the body, byte decoding, and unfolding.

use crate::error::{NoteDropError, Result};

/// An unfolded header block, in wire order.
///
/// Names are lowercased; values are trimmed with folding whitespace collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Get the first value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.0
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Split raw bytes at the first blank line into `(headers, body)`.
///
/// Content that starts with a blank line has an empty header block. A header
/// block whose last line break ends the input has an empty body (RFC 2046
/// `MIME-part-headers [CRLF *OCTET]`). Returns `None` when the headers are
/// not terminated at all.
pub fn split_header_body(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(rest) = data.strip_prefix(b"\r\n") {
        return Some((&data[..0], rest));
    }
    if let Some(rest) = data.strip_prefix(b"\n") {
        return Some((&data[..0], rest));
    }

    if let Some((end, body_start)) = find_header_end(data) {
        return Some((&data[..end], &data[body_start..]));
    }

    // Headers only, body empty
    let headers = data
        .strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))?;
    Some((headers, &data[data.len()..]))
}

/// Find where headers end. Returns `(end_of_headers, start_of_body)`.
fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    // Look for \n\n or \r\n\r\n
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some((i, i + 2));
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some((i, i + 4));
        }
    }
    None
}

/// Parse a header block, rejecting lines that are neither fields nor
/// continuations.
///
/// `section` is only used to label errors.
pub fn parse_headers(raw: &[u8], section: &str) -> Result<Headers> {
    let text = decode_header_bytes(raw);
    let malformed = |reason: String| NoteDropError::MalformedHeaders {
        section: section.to_string(),
        reason,
    };

    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation line
            let last = result
                .last_mut()
                .ok_or_else(|| malformed(format!("continuation before first field: {line:?}")))?;
            last.1.push(' ');
            last.1.push_str(line.trim());
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim_end();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(malformed(format!("invalid field name: {line:?}")));
            }
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name.to_lowercase(), value));
        } else {
            return Err(malformed(format!("line is not a header field: {line:?}")));
        }
    }

    Ok(Headers(result))
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}
