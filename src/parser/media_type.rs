//! `Content-Type` values (RFC 2045 §5.1): `type/subtype; name=value; ...`.

use crate::error::{NoteDropError, Result};

/// A parsed media type.
///
/// The essence (`type/subtype`) and parameter names are lowercased; parameter
/// values keep their case with quoting removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    /// Parse a header value such as `multipart/mixed; boundary="abc"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || NoteDropError::InvalidMediaType(raw.to_string());

        let mut segments = split_unquoted(raw, ';').into_iter();
        let essence = segments.next().unwrap_or_default().trim().to_lowercase();

        let (main, sub) = essence.split_once('/').ok_or_else(invalid)?;
        if !is_token(main) || !is_token(sub) {
            return Err(invalid());
        }

        let mut params: Vec<(String, String)> = Vec::new();
        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                // Tolerate a trailing or doubled `;`
                continue;
            }
            let (name, value) = segment.split_once('=').ok_or_else(invalid)?;
            let name = name.trim().to_lowercase();
            if !is_token(&name) {
                return Err(invalid());
            }
            let value = unquote(value.trim()).ok_or_else(invalid)?;
            // First occurrence wins
            if !params.iter().any(|(n, _)| *n == name) {
                params.push((name, value));
            }
        }

        Ok(Self { essence, params })
    }

    /// `type/subtype`, lowercased.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// The top-level type (`text`, `image`, `multipart`, ...).
    pub fn main_type(&self) -> &str {
        self.essence.split('/').next().unwrap_or_default()
    }

    /// `true` for any `multipart/*` type.
    pub fn is_multipart(&self) -> bool {
        self.main_type() == "multipart"
    }

    /// Look up a parameter by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `boundary` parameter, if present and non-empty.
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    /// The `charset` parameter, if present.
    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in &self.params {
            if is_token(value) {
                write!(f, "; {name}={value}")?;
            } else {
                write!(f, "; {name}=\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

/// RFC 2045 token: printable ASCII minus space, controls and tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'=')
        })
}

/// Split on `sep` outside of double-quoted strings.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

/// Strip a quoted-string, resolving backslash escapes. Bare tokens pass through.
fn unquote(value: &str) -> Option<String> {
    if let Some(inner) = value.strip_prefix('"') {
        let inner = inner.strip_suffix('"')?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                out.push(chars.next()?);
            } else {
                out.push(c);
            }
        }
        Some(out)
    } else if is_token(value) {
        Some(value.to_string())
    } else {
        None
    }
}
