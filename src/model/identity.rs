//! User identities as handed over by the identity provider.

/// Stable identity of a user, as issued by the external identity provider
/// (an email address in practice).
///
/// The core never interprets the value; it only uses it as a lookup key and
/// as the author of a [`Note`](super::note::Note).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Wrap an identity string. Surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserIdentity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
