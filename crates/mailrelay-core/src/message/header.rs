//! Header fields and content types.

use super::encoding::decode_rfc2047;
use std::collections::HashMap;

/// Header fields of a message or body part, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into().to_lowercase(), value.into()));
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Gets the first value for a header with encoded words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a header block; parsing stops at the first empty line.
    ///
    /// Folded lines (starting with space or tab) are unfolded into the
    /// preceding field. Lines without a colon are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim());
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim());
        }

        headers
    }

    /// Parsed `Content-Type`, defaulting to `text/plain`.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.get("content-type")
            .and_then(ContentType::parse)
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Returns true if the part is marked as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.get("content-disposition").is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("attachment"))
        })
    }
}

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// The RFC 2045 default, `text/plain; charset=us-ascii`.
    #[must_use]
    pub fn text_plain() -> Self {
        Self {
            main_type: "text".to_string(),
            sub_type: "plain".to_string(),
            parameters: HashMap::from([("charset".to_string(), "us-ascii".to_string())]),
        }
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks for an exact `type/subtype` match.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type == main_type && self.sub_type == sub_type
    }

    /// Parses `type/subtype; param1=value1; param2="value 2"`.
    ///
    /// Returns `None` when the type or subtype is missing.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = split_parameters(s).into_iter();

        let (main_type, sub_type) = parts.next()?.split_once('/')?;
        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return None;
        }

        let parameters = parts
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                Some((
                    key.trim().to_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();

        Some(Self {
            main_type,
            sub_type,
            parameters,
        })
    }
}

/// Splits on `;` outside of quoted strings.
fn split_parameters(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts.retain(|part| !part.is_empty());
    parts
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
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            "\tcharset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("from"), Some("sender@example.com"));
        assert_eq!(headers.get("TO"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("Body").is_none());
    }

    #[test]
    fn test_headers_repeated_fields() {
        let headers = Headers::parse("Received: a\nReceived: b\n\n");
        assert_eq!(headers.get_all("received"), vec!["a", "b"]);
    }

    #[test]
    fn test_headers_decoded_value() {
        let headers = Headers::parse("Subject: =?utf-8?B?SMOpbGxv?= world\r\n");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo world"));
    }

    #[test]
    fn test_attachment_disposition() {
        let headers = Headers::parse("Content-Disposition: attachment; filename=a.txt\r\n");
        assert!(headers.is_attachment());
        assert!(!Headers::parse("Content-Disposition: inline\r\n").is_attachment());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; charset=utf-8").unwrap();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part;123\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part;123"));
    }

    #[test]
    fn test_content_type_default() {
        let headers = Headers::parse("Content-Type: garbage\r\n");
        let ct = headers.content_type();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("us-ascii"));
    }
}
