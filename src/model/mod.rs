//! Core data model types: user identities, decomposed mail parts, and notes.

pub mod identity;
pub mod note;
pub mod part;
