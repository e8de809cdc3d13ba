//! Message parsing: envelope, header decoding, media types, transfer
//! decoding, and the multipart walker.

pub mod envelope;
pub mod header;
pub mod media_type;
pub mod multipart;
pub mod transfer;
