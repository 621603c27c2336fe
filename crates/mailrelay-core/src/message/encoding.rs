//! Transfer and header decoding.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 encoded words.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes Base64 data, ignoring embedded whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| Error::Message(format!("Invalid base64: {e}")))
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Malformed escapes are kept literally, as most mail readers do.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        match data.get(i + 1..) {
            Some([b'\r', b'\n', ..]) => {
                i += 3;
                continue;
            }
            Some([b'\n', ..]) => {
                i += 2;
                continue;
            }
            _ => {}
        }

        match data.get(i + 1..i + 3).and_then(hex_byte) {
            Some(decoded) => {
                result.push(decoded);
                i += 3;
            }
            None => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// Converts bytes in `charset` to a string.
///
/// UTF-8 and ASCII are decoded lossily; Latin-1 maps bytes to code points.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let charset = charset.unwrap_or("utf-8").to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1" => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped; words that fail
/// to decode are kept verbatim.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut pending_space = String::new();
    let mut previous_was_word = false;

    while !rest.is_empty() {
        if let Some((decoded, consumed)) = rest.strip_prefix("=?").and_then(decode_word) {
            if !previous_was_word {
                result.push_str(&pending_space);
            }
            pending_space.clear();
            result.push_str(&decoded);
            previous_was_word = true;
            rest = &rest[consumed + 2..];
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        if ch.is_whitespace() {
            pending_space.push(ch);
        } else {
            result.push_str(&pending_space);
            pending_space.clear();
            result.push(ch);
            previous_was_word = false;
        }
        rest = &rest[ch.len_utf8()..];
    }

    result.push_str(&pending_space);
    result
}

/// Decodes `charset?encoding?text?=` and returns the text plus bytes consumed.
fn decode_word(input: &str) -> Option<(String, usize)> {
    let (charset, rest) = input.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded = &rest[..end];
    if charset.is_empty()
        || encoding.len() != 1
        || charset.contains(char::is_whitespace)
        || encoded.contains(char::is_whitespace)
    {
        return None;
    }
    let consumed = charset.len() + encoding.len() + end + 4;

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(encoded.as_bytes()).ok()?,
        "Q" => decode_quoted_printable(encoded.replace('_', " ").as_bytes()),
        _ => return None,
    };

    Some((decode_charset(&bytes, Some(charset)), consumed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode() {
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
        assert!(decode_base64(b"***").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_malformed_escape_kept() {
        assert_eq!(decode_quoted_printable(b"a=ZZb="), b"a=ZZb=");
    }

    #[test]
    fn test_latin1_charset() {
        assert_eq!(decode_charset(&[0x48, 0xE9], Some("ISO-8859-1")), "Hé");
        assert_eq!(decode_charset("Hé".as_bytes(), None), "Hé");
    }

    #[test]
    fn test_rfc2047_plain_text_untouched() {
        assert_eq!(decode_rfc2047("Hello  World"), "Hello  World");
    }

    #[test]
    fn test_rfc2047_base64() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        assert_eq!(decode_rfc2047("=?UTF-8?Q?H=C3=A9llo_there?="), "Héllo there");
        assert_eq!(decode_rfc2047("=?utf-8?Q?=C3=A9t=C3=A9?="), "été");
    }

    #[test]
    fn test_rfc2047_mixed_and_adjacent_words() {
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?Q?caf=C3=A9?= =?utf-8?Q?_cr=C3=A8me?= today"),
            "Re: café crème today"
        );
    }

    #[test]
    fn test_rfc2047_invalid_word_kept() {
        assert_eq!(decode_rfc2047("=?utf-8?X?abc?= ok"), "=?utf-8?X?abc?= ok");
    }
}
