//! `cid:` reference rewriting.

/// URI scheme of an inline reference to a sibling part (RFC 2392).
pub const CID_SCHEME: &str = "cid:";

/// Prefix of storage keys derived from a `Content-ID`.
pub const CID_KEY_PREFIX: &str = "cid.";

/// Turns `cid:` references into public object URLs.
#[derive(Debug, Clone)]
pub struct ReferenceRewriter {
    base_url: String,
    replacement: String,
}

impl ReferenceRewriter {
    /// `base_url` is the public prefix objects are served under; a trailing
    /// `/` is ignored.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let base_url = base_url.as_ref().trim_end_matches('/').to_string();
        let replacement = format!("{base_url}/{CID_KEY_PREFIX}");
        Self {
            base_url,
            replacement,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace every `cid:` with `<base>/cid.`, leaving the rest untouched.
    ///
    /// Plain substitution: a `cid:` in prose is rewritten too.
    pub fn rewrite(&self, text: &str) -> String {
        text.replace(CID_SCHEME, &self.replacement)
    }

    /// Public URL of a stored object key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}
