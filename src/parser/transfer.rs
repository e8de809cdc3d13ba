//! Content-Transfer-Encoding (RFC 2045 §6) and charset decoding.

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::{NoteDropError, Result};

/// Base64 as found in mail: padding is frequently dropped by senders.
const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A declared transfer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Interpret a `Content-Transfer-Encoding` value. Absent or empty means 7bit.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let value = raw.map(|v| v.trim().to_lowercase()).unwrap_or_default();
        match value.as_str() {
            "" | "7bit" => Ok(Self::SevenBit),
            "8bit" => Ok(Self::EightBit),
            "binary" => Ok(Self::Binary),
            "base64" => Ok(Self::Base64),
            "quoted-printable" => Ok(Self::QuotedPrintable),
            other => Err(NoteDropError::Decode(format!(
                "unsupported transfer encoding '{other}'"
            ))),
        }
    }
}

/// Undo the transfer encoding of a payload. Identity encodings borrow.
pub fn decode<'a>(payload: &'a [u8], encoding: Option<&str>) -> Result<Cow<'a, [u8]>> {
    match TransferEncoding::parse(encoding)? {
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
            Ok(Cow::Borrowed(payload))
        }
        TransferEncoding::Base64 => {
            let cleaned: Vec<u8> = payload
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            MIME_BASE64
                .decode(&cleaned)
                .map(Cow::Owned)
                .map_err(|e| NoteDropError::Decode(format!("base64: {e}")))
        }
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(payload, quoted_printable::ParseMode::Robust)
                .map(Cow::Owned)
                .map_err(|e| NoteDropError::Decode(format!("quoted-printable: {e}")))
        }
    }
}

/// Undo the transfer encoding, then decode the bytes from `charset`.
///
/// Unknown or missing charsets are read as UTF-8, replacing invalid sequences.
pub fn decode_text(payload: &[u8], encoding: Option<&str>, charset: Option<&str>) -> Result<String> {
    let bytes = decode(payload, encoding)?;
    let encoding = charset
        .and_then(|label| encoding_rs::Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        tracing::debug!(charset = encoding.name(), "Replaced malformed sequences in text part");
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_encodings_borrow() {
        let data = b"hello world";
        assert!(matches!(decode(data, None).unwrap(), Cow::Borrowed(_)));
        assert!(matches!(decode(data, Some("8BIT")).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_base64_with_line_breaks_and_no_padding() {
        let decoded = decode(b"aGVsbG8g\r\nd29ybGQ", Some("base64")).unwrap();
        assert_eq!(&decoded[..], b"hello world");
    }

    #[test]
    fn test_base64_garbage_is_an_error() {
        let err = decode(b"!!!not base64!!!", Some("base64")).unwrap_err();
        assert!(matches!(err, NoteDropError::Decode(_)));
    }

    #[test]
    fn test_quoted_printable() {
        let decoded = decode(b"caf=C3=A9 =\r\nau lait", Some("quoted-printable")).unwrap();
        assert_eq!(std::str::from_utf8(&decoded).unwrap(), "café au lait");
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        assert!(decode(b"x", Some("x-uuencode")).is_err());
    }

    #[test]
    fn test_decode_text_latin1() {
        let text = decode_text(b"caf\xE9", None, Some("iso-8859-1")).unwrap();
        assert_eq!(text, "café");
    }

    #[test]
    fn test_decode_text_unknown_charset_is_utf8() {
        let text = decode_text("naïve".as_bytes(), Some("8bit"), Some("x-made-up")).unwrap();
        assert_eq!(text, "naïve");
    }
}
