//! Centralized error types for notedrop.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the notedrop library.
#[derive(Error, Debug)]
pub enum NoteDropError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The recipient token does not belong to any known user.
    #[error("Unknown recipient token: {0}")]
    UnknownRecipient(String),

    /// The message carries no usable recipient address.
    #[error("Message has no recipient address")]
    MissingRecipient,

    /// A `Content-Type` value could not be parsed.
    #[error("Invalid media type: '{0}'")]
    InvalidMediaType(String),

    /// The walker was handed a single-part body.
    #[error("Not a multipart container: {0}")]
    NotAContainer(String),

    /// A multipart content type without a `boundary` parameter.
    #[error("Multipart content type has no boundary: {0}")]
    MissingBoundary(String),

    /// No delimiter line for the declared boundary was found in the body.
    #[error("No delimiter line for boundary '{0}'")]
    MissingDelimiter(String),

    /// The body ended before the close delimiter.
    #[error("Multipart body for boundary '{0}' is not terminated")]
    UnterminatedMultipart(String),

    /// A section's headers could not be read.
    #[error("Malformed headers in section {section}: {reason}")]
    MalformedHeaders { section: String, reason: String },

    /// Multipart nesting exceeded the walker's depth limit.
    #[error("Multipart nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A transfer encoding could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The object store refused to open a writer.
    #[error("Cannot open object '{key}': {reason}")]
    ObjectOpen { key: String, reason: String },

    /// The public-read access rule could not be applied.
    #[error("Cannot set public-read rule on bucket '{bucket}': {reason}")]
    AccessRule { bucket: String, reason: String },

    /// Writing object bytes failed.
    #[error("Cannot write object '{key}': {reason}")]
    ObjectWrite { key: String, reason: String },

    /// Closing the object writer failed.
    #[error("Cannot close object '{key}': {reason}")]
    ObjectClose { key: String, reason: String },

    /// The object was not found (or was incomplete) after close.
    #[error("Object '{key}' failed finalization: {reason}")]
    ObjectFinalize { key: String, reason: String },

    /// A note would have no content.
    #[error("Note content is empty")]
    EmptyNote,

    /// A record store (tokens, notes) operation failed.
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// The operating system random source failed.
    #[error("Cannot gather entropy: {0}")]
    Entropy(String),
}

/// Convenience alias for `Result<T, NoteDropError>`.
pub type Result<T> = std::result::Result<T, NoteDropError>;

impl NoteDropError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures that drop the whole message (recipient and parse
    /// errors). Everything else is contained to the part that raised it.
    pub fn is_message_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownRecipient(_)
                | Self::MissingRecipient
                | Self::InvalidMediaType(_)
                | Self::NotAContainer(_)
                | Self::MissingBoundary(_)
                | Self::MissingDelimiter(_)
                | Self::UnterminatedMultipart(_)
                | Self::MalformedHeaders { .. }
                | Self::NestingTooDeep(_)
        )
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `NoteDropError::io`).
impl From<std::io::Error> for NoteDropError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<serde_json::Error> for NoteDropError {
    fn from(e: serde_json::Error) -> Self {
        Self::RecordStore(e.to_string())
    }
}
