//! Top-level RFC 5322 message handling: recipient, content type, and body.

use std::path::Path;

use mail_parser::MessageParser;

use crate::error::{NoteDropError, Result};
use crate::model::part::MailPart;
use crate::parser::header::{parse_headers, split_header_body, Headers};
use crate::parser::multipart::DEFAULT_CONTENT_TYPE;

/// The parts of an inbound message the pipeline cares about.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Address of the first `To:` recipient.
    pub recipient: Option<String>,

    /// Top-level `Content-Type` (defaulted when absent).
    pub content_type: String,

    /// The `Message-ID` header, for log correlation.
    pub message_id: Option<String>,

    /// Unfolded top-level headers.
    pub headers: Headers,

    /// Everything after the header block.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Parse a complete raw message (headers + body).
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let message_bytes = skip_from_line(raw);

        let (raw_headers, body) = split_header_body(message_bytes)
            // A message may consist of headers only
            .unwrap_or((message_bytes, &message_bytes[message_bytes.len()..]));
        let headers = parse_headers(raw_headers, "0")?;

        let recipient = first_recipient(message_bytes);

        let content_type = headers
            .get("content-type")
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let message_id = headers.get("message-id").map(str::to_string);

        Ok(Self {
            recipient,
            content_type,
            message_id,
            headers,
            body: body.to_vec(),
        })
    }

    /// Treat the whole body as one leaf, for messages that are not multipart.
    pub fn into_single_part(self) -> MailPart {
        let header = |name: &str| {
            self.headers
                .get(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        MailPart {
            content_id: header("content-id"),
            transfer_encoding: header("content-transfer-encoding"),
            disposition: header("content-disposition"),
            media_type: self.content_type,
            payload: self.body,
            path: Vec::new(),
            alternative: None,
        }
    }
}

/// Read a single `.eml` file from disk.
pub fn read_eml(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| NoteDropError::io(path, e))
}

/// Address of the first `To:` recipient, as parsed by `mail-parser`
/// (groups, comments and RFC 2047 display names included).
fn first_recipient(message: &[u8]) -> Option<String> {
    let parsed = MessageParser::default().parse(message)?;
    parsed
        .to()
        .and_then(|to| to.first())
        .and_then(|addr| addr.address())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
}

/// Skip a leading mbox `From ` separator line and UTF-8 BOM.
fn skip_from_line(data: &[u8]) -> &[u8] {
    // Handle BOM
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    if data.starts_with(b"From ") {
        // Find end of line
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
