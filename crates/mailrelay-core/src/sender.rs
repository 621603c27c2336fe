//! Delivery of accepted messages through the Microsoft Graph `sendMail` API.

use crate::error::{Error, Result};
use crate::message::{BodyKind, Mailbox, ParsedMessage};
use async_trait::async_trait;
use mailrelay_oauth::AccessToken;
use mailrelay_smtp::Envelope;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

/// Hands a message to the mail API on behalf of the authenticated account.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Sends one message using `token` for authorization.
    async fn send(&self, envelope: &Envelope, token: &AccessToken) -> Result<()>;
}

/// Request body of `POST /me/sendMail`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest {
    message: GraphMessage,
    save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    subject: String,
    body: ItemBody,
    to_recipients: Vec<Recipient>,
    cc_recipients: Vec<Recipient>,
    bcc_recipients: Vec<Recipient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    content_type: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    address: String,
}

impl From<&Mailbox> for Recipient {
    fn from(mailbox: &Mailbox) -> Self {
        Self {
            email_address: EmailAddress {
                name: mailbox.name.clone(),
                address: mailbox.address.clone(),
            },
        }
    }
}

impl Recipient {
    fn bare(address: &str) -> Self {
        Self {
            email_address: EmailAddress {
                name: None,
                address: address.to_string(),
            },
        }
    }
}

impl SendMailRequest {
    fn build(envelope: &Envelope) -> Self {
        let parsed = ParsedMessage::parse(&envelope.data);

        let to_recipients = if parsed.to.is_empty() {
            envelope
                .rcpt_to
                .iter()
                .map(|rcpt| Recipient::bare(rcpt.as_str()))
                .collect()
        } else {
            parsed.to.iter().map(Recipient::from).collect()
        };

        // Envelope recipients hidden from the headers.
        let bcc_recipients = if parsed.to.is_empty() {
            Vec::new()
        } else {
            envelope
                .rcpt_to
                .iter()
                .filter(|rcpt| !parsed.names_recipient(rcpt.as_str()))
                .map(|rcpt| Recipient::bare(rcpt.as_str()))
                .collect()
        };

        let (kind, content) = parsed.body();
        let content_type = match kind {
            BodyKind::Text => "Text",
            BodyKind::Html => "HTML",
        };

        Self {
            message: GraphMessage {
                subject: parsed.subject.clone().unwrap_or_default(),
                body: ItemBody {
                    content_type,
                    content: content.to_string(),
                },
                to_recipients,
                cc_recipients: parsed.cc.iter().map(Recipient::from).collect(),
                bcc_recipients,
            },
            save_to_sent_items: true,
        }
    }

    fn recipient_list(&self) -> String {
        self.message
            .to_recipients
            .iter()
            .chain(&self.message.cc_recipients)
            .chain(&self.message.bcc_recipients)
            .map(|recipient| recipient.email_address.address.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// [`MailSender`] backed by the Graph REST API.
#[derive(Debug, Clone)]
pub struct GraphMailSender {
    http_client: Client,
    send_mail_url: Url,
}

impl GraphMailSender {
    /// Creates a sender posting to `send_mail_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(send_mail_url: &str) -> Result<Self> {
        let send_mail_url = Url::parse(send_mail_url)
            .map_err(|e| Error::Message(format!("Invalid sendMail URL {send_mail_url}: {e}")))?;
        Ok(Self {
            http_client: Client::new(),
            send_mail_url,
        })
    }

    /// Uses a preconfigured HTTP client (timeouts, proxies).
    #[must_use]
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }
}

#[async_trait]
impl MailSender for GraphMailSender {
    async fn send(&self, envelope: &Envelope, token: &AccessToken) -> Result<()> {
        let request = SendMailRequest::build(envelope);
        let recipients = request.recipient_list();
        debug!(
            "Posting message ({} bytes) to {}",
            envelope.size(),
            self.send_mail_url
        );

        let response = self
            .http_client
            .post(self.send_mail_url.clone())
            .header(AUTHORIZATION, token.authorization_header())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Graph {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        info!("Mail sent to {recipients}");
        Ok(())
    }
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
    use chrono::{Duration, Utc};
    use mailrelay_smtp::Address;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope(rcpts: &[&str], data: &str) -> Envelope {
        Envelope {
            mail_from: Some(Address::new("app@example.com").unwrap()),
            rcpt_to: rcpts.iter().map(|r| Address::new(*r).unwrap()).collect(),
            data: data.as_bytes().to_vec(),
            received_at: Utc::now(),
        }
    }

    fn token() -> AccessToken {
        AccessToken {
            access_token: "graph-token".to_string(),
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_request_uses_headers_and_hides_extra_recipients() {
        let envelope = envelope(
            &["bob@example.com", "carol@example.com", "audit@example.com"],
            "To: Bob <bob@example.com>\r\nCc: carol@example.com\r\nSubject: Report\r\n\r\nDone.\r\n",
        );

        let request = serde_json::to_value(SendMailRequest::build(&envelope)).unwrap();
        assert_eq!(
            request,
            json!({
                "message": {
                    "subject": "Report",
                    "body": { "contentType": "Text", "content": "Done.\r\n" },
                    "toRecipients": [
                        { "emailAddress": { "name": "Bob", "address": "bob@example.com" } }
                    ],
                    "ccRecipients": [
                        { "emailAddress": { "address": "carol@example.com" } }
                    ],
                    "bccRecipients": [
                        { "emailAddress": { "address": "audit@example.com" } }
                    ]
                },
                "saveToSentItems": true
            })
        );
    }

    #[test]
    fn test_request_without_to_header_uses_envelope() {
        let envelope = envelope(
            &["bob@example.com", "carol@example.com"],
            "Subject: Alert\r\nContent-Type: text/html\r\n\r\n<b>down</b>",
        );

        let request = SendMailRequest::build(&envelope);
        assert_eq!(request.message.to_recipients.len(), 2);
        assert!(request.message.bcc_recipients.is_empty());
        assert_eq!(request.message.body.content_type, "HTML");
        assert_eq!(
            request.recipient_list(),
            "bob@example.com, carol@example.com"
        );
    }

    #[tokio::test]
    async fn test_send_posts_with_bearer_token() {
        let server = MockServer::start().await;
        let envelope = envelope(&["bob@example.com"], "Subject: Hi\r\n\r\nHello\r\n");

        Mock::given(method("POST"))
            .and(path("/v1.0/me/sendMail"))
            .and(header("authorization", "Bearer graph-token"))
            .and(body_json(
                serde_json::to_value(SendMailRequest::build(&envelope)).unwrap(),
            ))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sender = GraphMailSender::new(&format!("{}/v1.0/me/sendMail", server.uri())).unwrap();
        sender.send(&envelope, &token()).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string("{\"error\":{\"code\":\"ErrorAccessDenied\"}}"),
            )
            .mount(&server)
            .await;

        let sender = GraphMailSender::new(&format!("{}/sendMail", server.uri())).unwrap();
        let result = sender
            .send(&envelope(&["bob@example.com"], "\r\nbody"), &token())
            .await;

        match result {
            Err(Error::Graph { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.contains("ErrorAccessDenied"));
            }
            other => panic!("expected Graph error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(GraphMailSender::new("not a url").is_err());
    }
}
