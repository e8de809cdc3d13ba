//! Durable note records.

use chrono::{DateTime, Utc};

use super::identity::UserIdentity;

/// Where a note came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSource {
    /// Assembled from an inbound email.
    Mail,
    /// Submitted through the web form.
    Web,
}

/// A stored note. Created once, never mutated.
///
/// `content` is handed to the renderer as markup; sanitizing it is the
/// renderer's job.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Note {
    /// Author, `None` for anonymous web submissions.
    pub author: Option<UserIdentity>,

    /// Note body, with `cid:` references already rewritten.
    pub content: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Origin of the note.
    pub source: NoteSource,
}

impl Note {
    /// A note assembled from mail, stamped now.
    pub fn from_mail(author: UserIdentity, content: String) -> Self {
        Self {
            author: Some(author),
            content,
            created_at: Utc::now(),
            source: NoteSource::Mail,
        }
    }

    /// A note submitted through the web form, stamped now.
    pub fn from_web(author: Option<UserIdentity>, content: String) -> Self {
        Self {
            author,
            content,
            created_at: Utc::now(),
            source: NoteSource::Web,
        }
    }
}
