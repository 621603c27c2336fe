//! Extraction of the parts of a submitted message the mail API needs.
//!
//! The listener hands over raw `DATA` bytes. [`ParsedMessage::parse`] reads
//! the header block, walks (possibly nested) multipart bodies, and keeps the
//! subject, the `To`/`Cc` mailboxes and the readable body text. Parsing is
//! lenient: a malformed message still yields whatever could be recovered.

pub mod encoding;
pub mod header;

pub use header::{ContentType, Headers};

use encoding::{decode_base64, decode_charset, decode_quoted_printable, decode_rfc2047};
use tracing::debug;

/// Nesting limit for multipart bodies.
const MAX_DEPTH: usize = 8;

/// A mailbox from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, if one was given.
    pub name: Option<String>,
    /// Address (`local@domain`).
    pub address: String,
}

impl Mailbox {
    /// Parses `Name <addr>`, `<addr>` or a bare `addr`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (name, address) = match (s.rfind('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = s[..open].trim().trim_matches('"').trim();
                let name = (!name.is_empty()).then(|| decode_rfc2047(name));
                (name, s[open + 1..close].trim())
            }
            _ => (None, s),
        };

        if !address.contains('@') || address.contains(char::is_whitespace) {
            return None;
        }

        Some(Self {
            name,
            address: address.to_string(),
        })
    }

    /// Parses a comma-separated address list, skipping entries without an address.
    #[must_use]
    pub fn parse_list(s: &str) -> Vec<Self> {
        split_addresses(s)
            .into_iter()
            .filter_map(Self::parse)
            .collect()
    }
}

/// Splits on commas outside quoted strings and angle brackets.
fn split_addresses(s: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                items.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&s[start..]);
    items
}

/// Kind of body text carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Plain text.
    Text,
    /// HTML.
    Html,
}

/// The parts of a message relevant for relaying.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// Top-level headers.
    pub headers: Headers,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Mailboxes from every `To` header.
    pub to: Vec<Mailbox>,
    /// Mailboxes from every `Cc` header.
    pub cc: Vec<Mailbox>,
    /// Concatenated `text/plain` parts.
    pub text: Option<String>,
    /// Concatenated `text/html` parts.
    pub html: Option<String>,
}

impl ParsedMessage {
    /// Parses raw message bytes.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_head_body(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head));

        let mut text = Vec::new();
        let mut html = Vec::new();
        collect_bodies(&headers, body, 0, &mut text, &mut html);

        Self {
            subject: headers.get_decoded("subject"),
            to: addresses(&headers, "to"),
            cc: addresses(&headers, "cc"),
            text: join(text),
            html: join(html),
            headers,
        }
    }

    /// Body to relay: plain text when present, otherwise HTML, otherwise empty text.
    #[must_use]
    pub fn body(&self) -> (BodyKind, &str) {
        match (&self.text, &self.html) {
            (Some(text), _) => (BodyKind::Text, text),
            (None, Some(html)) => (BodyKind::Html, html),
            (None, None) => (BodyKind::Text, ""),
        }
    }

    /// Returns true if `address` appears in `To` or `Cc`.
    #[must_use]
    pub fn names_recipient(&self, address: &str) -> bool {
        self.to
            .iter()
            .chain(&self.cc)
            .any(|mailbox| mailbox.address.eq_ignore_ascii_case(address))
    }
}

fn addresses(headers: &Headers, name: &str) -> Vec<Mailbox> {
    headers
        .get_all(name)
        .into_iter()
        .flat_map(Mailbox::parse_list)
        .collect()
}

fn join(parts: Vec<String>) -> Option<String> {
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn collect_bodies(
    headers: &Headers,
    body: &[u8],
    depth: usize,
    text: &mut Vec<String>,
    html: &mut Vec<String>,
) {
    let content_type = headers.content_type();

    if content_type.is_multipart() {
        if depth >= MAX_DEPTH {
            debug!("Multipart nesting deeper than {MAX_DEPTH}, skipping");
            return;
        }
        let Some(boundary) = content_type.boundary() else {
            debug!("Multipart body without boundary, skipping");
            return;
        };
        for part in split_multipart(body, boundary) {
            let (head, part_body) = split_head_body(part);
            let part_headers = Headers::parse(&String::from_utf8_lossy(head));
            collect_bodies(&part_headers, part_body, depth + 1, text, html);
        }
        return;
    }

    if headers.is_attachment() {
        return;
    }

    let target = if content_type.is("text", "plain") {
        text
    } else if content_type.is("text", "html") {
        html
    } else {
        return;
    };

    let decoded = decode_transfer(headers, body);
    target.push(decode_charset(&decoded, content_type.charset()));
}

fn decode_transfer(headers: &Headers, body: &[u8]) -> Vec<u8> {
    let encoding = headers
        .get("content-transfer-encoding")
        .map(|value| value.trim().to_ascii_lowercase());

    match encoding.as_deref() {
        Some("base64") => decode_base64(body).unwrap_or_else(|e| {
            debug!("Keeping undecodable body as is: {e}");
            body.to_vec()
        }),
        Some("quoted-printable") => decode_quoted_printable(body),
        _ => body.to_vec(),
    }
}

/// Splits at the first empty line into header block and body.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n").or_else(|| raw.strip_prefix(b"\n")) {
        return (&raw[..0], body);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(raw, b"\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((head_end, body_start)) => (&raw[..head_end], &raw[body_start..]),
        None => (raw, &raw[raw.len()..]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Returns the body parts between `--boundary` delimiter lines.
///
/// The preamble and epilogue are dropped. An unterminated final part is kept.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = trim_line_end(&body[pos..end]);

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(part_start) = start {
                    parts.push(trim_line_end(&body[part_start..pos]));
                }
                if closing {
                    return parts;
                }
                start = Some(end);
            }
        }
        pos = end;
    }

    if let Some(part_start) = start {
        parts.push(&body[part_start..]);
    }
    parts
}

/// Strips one trailing line ending.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_message() {
        let raw = concat!(
            "From: Alice <alice@example.com>\r\n",
            "To: Bob <bob@example.com>, carol@example.com\r\n",
            "Subject: Lunch\r\n",
            "\r\n",
            "See you at noon.\r\n"
        );

        let message = ParsedMessage::parse(raw.as_bytes());
        assert_eq!(message.subject.as_deref(), Some("Lunch"));
        assert_eq!(
            message.to,
            vec![
                Mailbox {
                    name: Some("Bob".to_string()),
                    address: "bob@example.com".to_string(),
                },
                Mailbox {
                    name: None,
                    address: "carol@example.com".to_string(),
                },
            ]
        );
        assert!(message.cc.is_empty());
        assert_eq!(message.body(), (BodyKind::Text, "See you at noon.\r\n"));
    }

    #[test]
    fn test_mailbox_list_with_quoted_comma() {
        let list = Mailbox::parse_list(
            "\"Doe, Jane\" <jane@example.com>, =?utf-8?Q?Ren=C3=A9?= <rene@example.com>, undisclosed-recipients:;",
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("Doe, Jane"));
        assert_eq!(list[1].name.as_deref(), Some("René"));
        assert_eq!(list[1].address, "rene@example.com");
    }

    #[test]
    fn test_headers_only_message() {
        let message = ParsedMessage::parse(b"Subject: Empty\r\n");
        assert_eq!(message.subject.as_deref(), Some("Empty"));
        assert_eq!(message.body(), (BodyKind::Text, ""));
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let message = ParsedMessage::parse(b"Subject: Unix\nCc: dave@example.com\n\nbody\n");
        assert_eq!(message.subject.as_deref(), Some("Unix"));
        assert!(message.names_recipient("DAVE@example.com"));
        assert_eq!(message.text.as_deref(), Some("body\n"));
    }

    #[test]
    fn test_multipart_alternative_prefers_text() {
        let raw = concat!(
            "Subject: =?utf-8?B?SMOpbGxv?=\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "This is a multi-part message.\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "Caf=C3=A9 at ten=\r\n",
            " o'clock\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>Caf&eacute;</p>\r\n",
            "--b1--\r\n",
            "epilogue\r\n"
        );

        let message = ParsedMessage::parse(raw.as_bytes());
        assert_eq!(message.subject.as_deref(), Some("Héllo"));
        assert_eq!(message.text.as_deref(), Some("Café at ten o'clock"));
        assert_eq!(message.html.as_deref(), Some("<p>Caf&eacute;</p>"));
        assert_eq!(message.body().0, BodyKind::Text);
    }

    #[test]
    fn test_nested_multipart_with_attachment() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PGI+aGk8L2I+\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Disposition: attachment; filename=notes.txt\r\n",
            "\r\n",
            "not the body\r\n",
            "--outer--\r\n"
        );

        let message = ParsedMessage::parse(raw.as_bytes());
        assert!(message.text.is_none());
        assert_eq!(message.body(), (BodyKind::Html, "<b>hi</b>"));
    }

    #[test]
    fn test_unterminated_multipart_keeps_last_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=x\r\n",
            "\r\n",
            "--x\r\n",
            "\r\n",
            "first\r\n",
            "--x\r\n",
            "\r\n",
            "second\r\n"
        );

        let message = ParsedMessage::parse(raw.as_bytes());
        assert_eq!(message.text.as_deref(), Some("first\nsecond\r\n"));
    }

    #[test]
    fn test_latin1_body() {
        let raw = b"Content-Type: text/plain; charset=iso-8859-1\r\n\r\nd\xe9j\xe0";
        let message = ParsedMessage::parse(raw);
        assert_eq!(message.text.as_deref(), Some("déjà"));
    }
}
