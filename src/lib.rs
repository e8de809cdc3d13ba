//! `notedrop`: turn inbound email into notes.
//!
//! This crate provides the ingestion core: resolving the per-user recipient
//! token, flattening MIME bodies, assembling note text, and storing inline
//! attachments as public objects whose URLs replace the `cid:` references.

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod store;
