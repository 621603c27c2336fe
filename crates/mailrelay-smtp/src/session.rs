//! One inbound SMTP conversation.

use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Address, Envelope, Extension, Reply, ReplyCode};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Default maximum message size (25 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 25 * 1024 * 1024;

/// Longest command line accepted, CRLF included.
const MAX_COMMAND_LINE: usize = 4096;

/// Settings shared by every session of a listener.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced in the greeting and EHLO reply.
    pub hostname: String,
    /// Largest message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Mail transaction in progress.
#[derive(Debug, Default)]
struct Transaction {
    mail_from: Option<Address>,
    rcpt_to: Vec<Address>,
}

/// Whether the conversation continues after a command.
enum Flow {
    Continue,
    Close,
}

/// Server side of one SMTP connection.
pub struct Session<S> {
    stream: BufReader<S>,
    config: SessionConfig,
    queue: UnboundedSender<Envelope>,
    greeted: bool,
    transaction: Option<Transaction>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Creates a session over an accepted stream.
    pub fn new(stream: S, config: SessionConfig, queue: UnboundedSender<Envelope>) -> Self {
        Self {
            stream: BufReader::new(stream),
            config,
            queue,
            greeted: false,
            transaction: None,
        }
    }

    /// Runs the conversation until QUIT or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the peer disconnects mid-message.
    pub async fn run(mut self) -> Result<()> {
        let greeting = format!("{} ESMTP mailrelay ready", self.config.hostname);
        self.send(&Reply::line(ReplyCode::SERVICE_READY, greeting)).await?;

        loop {
            let line = match self.read_command_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Client closed the connection");
                    return Ok(());
                }
                Err(e @ Error::Protocol(_)) => {
                    let text = format!("{} {e}, closing connection", self.config.hostname);
                    self.send(&Reply::line(ReplyCode::SERVICE_UNAVAILABLE, text)).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let reply = match Command::parse(&line) {
                Ok(command) => match self.handle(command).await? {
                    (reply, Flow::Continue) => reply,
                    (reply, Flow::Close) => {
                        self.send(&reply).await?;
                        return Ok(());
                    }
                },
                Err(e) => {
                    debug!("Rejecting command {line:?}: {e}");
                    Reply::line(ReplyCode::PARAMETER_ERROR, format!("Error: {e}"))
                }
            };
            self.send(&reply).await?;
        }
    }

    async fn handle(&mut self, command: Command) -> Result<(Reply, Flow)> {
        let reply = match command {
            Command::Helo { hostname } => {
                self.greet();
                Reply::line(ReplyCode::OK, format!("{} greets {hostname}", self.config.hostname))
            }
            Command::Ehlo { hostname } => {
                self.greet();
                let mut lines = vec![format!("{} greets {hostname}", self.config.hostname)];
                lines.extend(
                    [
                        Extension::EightBitMime,
                        Extension::Size(self.config.max_message_size),
                        Extension::Pipelining,
                    ]
                    .iter()
                    .map(ToString::to_string),
                );
                Reply::new(ReplyCode::OK, lines)
            }
            Command::MailFrom { from, size, .. } => self.mail_from(from, size),
            Command::RcptTo { to } => self.rcpt_to(to),
            Command::Data => return self.data().await.map(|reply| (reply, Flow::Continue)),
            Command::Rset => {
                self.transaction = None;
                Reply::line(ReplyCode::OK, "OK")
            }
            Command::Noop => Reply::line(ReplyCode::OK, "OK"),
            Command::Vrfy { .. } => Reply::line(
                ReplyCode::CANNOT_VERIFY,
                "Cannot VRFY user, but will accept message and attempt delivery",
            ),
            Command::Quit => return Ok((Reply::line(ReplyCode::CLOSING, "Bye"), Flow::Close)),
            Command::NotImplemented(verb) => Reply::line(
                ReplyCode::NOT_IMPLEMENTED,
                format!("Error: command \"{verb}\" not implemented"),
            ),
            Command::Unknown(verb) => Reply::line(
                ReplyCode::SYNTAX_ERROR,
                format!("Error: command \"{verb}\" not recognized"),
            ),
        };
        Ok((reply, Flow::Continue))
    }

    fn greet(&mut self) {
        self.greeted = true;
        self.transaction = None;
    }

    fn mail_from(&mut self, from: Option<Address>, size: Option<usize>) -> Reply {
        if let Err(e) = self.check_can_start_mail() {
            return bad_sequence(&e);
        }
        if let Some(size) = size.filter(|size| *size > self.config.max_message_size) {
            return Reply::line(
                ReplyCode::EXCEEDED_STORAGE,
                format!("Error: {}", Error::MessageTooLarge(size)),
            );
        }

        self.transaction = Some(Transaction {
            mail_from: from,
            rcpt_to: Vec::new(),
        });
        Reply::line(ReplyCode::OK, "OK")
    }

    fn check_can_start_mail(&self) -> Result<()> {
        if !self.greeted {
            return Err(Error::InvalidState("send HELO/EHLO first".into()));
        }
        if self.transaction.is_some() {
            return Err(Error::InvalidState("nested MAIL command".into()));
        }
        Ok(())
    }

    fn rcpt_to(&mut self, to: Address) -> Reply {
        let Some(transaction) = self.transaction.as_mut() else {
            return bad_sequence(&Error::InvalidState("need MAIL command".into()));
        };
        transaction.rcpt_to.push(to);
        Reply::line(ReplyCode::OK, "OK")
    }

    async fn data(&mut self) -> Result<Reply> {
        let ready = self
            .transaction
            .as_ref()
            .is_some_and(|transaction| !transaction.rcpt_to.is_empty());
        if !ready {
            let reason = if self.transaction.is_none() {
                "need MAIL command"
            } else {
                "need RCPT command"
            };
            return Ok(bad_sequence(&Error::InvalidState(reason.into())));
        }

        self.send(&Reply::line(
            ReplyCode::START_DATA,
            "End data with <CR><LF>.<CR><LF>",
        ))
        .await?;

        let content = self.read_data().await;
        let Some(transaction) = self.transaction.take() else {
            return Ok(bad_sequence(&Error::InvalidState("need MAIL command".into())));
        };

        let data = match content {
            Ok(data) => data,
            Err(Error::MessageTooLarge(size)) => {
                warn!("Rejected message of {size} bytes");
                return Ok(Reply::line(
                    ReplyCode::EXCEEDED_STORAGE,
                    format!("Error: {}", Error::MessageTooLarge(size)),
                ));
            }
            Err(e) => return Err(e),
        };

        let envelope = Envelope {
            mail_from: transaction.mail_from,
            rcpt_to: transaction.rcpt_to,
            data,
            received_at: Utc::now(),
        };
        let recipients = envelope.rcpt_to.len();
        let size = envelope.size();

        if self.queue.send(envelope).is_err() {
            warn!("Mail queue is closed, rejecting message");
            return Ok(Reply::line(
                ReplyCode::LOCAL_ERROR,
                "Requested action aborted: local error in processing",
            ));
        }

        info!("Queued message of {size} bytes for {recipients} recipient(s)");
        Ok(Reply::line(ReplyCode::OK, "OK: queued"))
    }

    /// Reads message content up to the terminating `.` line.
    ///
    /// Oversized content is consumed and discarded so the session stays in sync.
    /// No more than one size limit's worth of a line is buffered at a time.
    async fn read_data(&mut self) -> Result<Vec<u8>> {
        let limit = self.config.max_message_size.saturating_add(3) as u64;
        let mut data = Vec::new();
        let mut size = 0usize;
        let mut line = Vec::new();

        loop {
            line.clear();
            let mut discarded = 0usize;
            loop {
                let read = (&mut self.stream)
                    .take(limit)
                    .read_until(b'\n', &mut line)
                    .await?;
                if read == 0 {
                    return Err(Error::Protocol("Connection closed during DATA".into()));
                }
                if line.ends_with(b"\n") {
                    break;
                }
                discarded = discarded.saturating_add(line.len());
                line.clear();
            }

            if discarded > 0 {
                size = size.saturating_add(discarded + line.len());
                continue;
            }

            let content = strip_line_ending(&line);
            if content == b"." {
                break;
            }
            let content = content.strip_prefix(b".").unwrap_or(content);

            size = size.saturating_add(content.len() + 2);
            if size <= self.config.max_message_size {
                data.extend_from_slice(content);
                data.extend_from_slice(b"\r\n");
            }
        }

        if size > self.config.max_message_size {
            return Err(Error::MessageTooLarge(size));
        }
        Ok(data)
    }

    async fn read_command_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_COMMAND_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") && read == MAX_COMMAND_LINE {
            return Err(Error::Protocol("Command line too long".into()));
        }
        Ok(Some(String::from_utf8_lossy(strip_line_ending(&line)).into_owned()))
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(&reply.to_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn bad_sequence(error: &Error) -> Reply {
    let reason = match error {
        Error::InvalidState(reason) => reason.as_str(),
        _ => "bad sequence of commands",
    };
    Reply::line(ReplyCode::BAD_SEQUENCE, format!("Error: {reason}"))
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_test::io::Builder;

    const GREETING: &[u8] = b"220 relay.test ESMTP mailrelay ready\r\n";

    fn config() -> SessionConfig {
        SessionConfig {
            hostname: "relay.test".to_string(),
            max_message_size: 64,
        }
    }

    #[tokio::test]
    async fn test_full_transaction_is_queued() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"EHLO client.test\r\n")
            .write(b"250-relay.test greets client.test\r\n250-8BITMIME\r\n250-SIZE 64\r\n250 PIPELINING\r\n")
            .read(b"MAIL FROM:<alice@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"RCPT TO:<bob@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"Subject: hi\r\n\r\n..leading dot\r\n.\r\n")
            .write(b"250 OK: queued\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 Bye\r\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.mail_from.unwrap().as_str(), "alice@example.com");
        assert_eq!(envelope.rcpt_to.len(), 1);
        assert_eq!(envelope.data, b"Subject: hi\r\n\r\n.leading dot\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"HELO client.test\r\nMAIL FROM:<>\r\nRCPT TO:<bob@example.com>\r\nDATA\r\n")
            .write(b"250 relay.test greets client.test\r\n")
            .write(b"250 OK\r\n")
            .write(b"250 OK\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"body\n.\n")
            .write(b"250 OK: queued\r\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert!(envelope.mail_from.is_none());
        assert_eq!(envelope.data, b"body\r\n");
    }

    #[tokio::test]
    async fn test_bad_sequences() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"MAIL FROM:<a@example.com>\r\n")
            .write(b"503 Error: send HELO/EHLO first\r\n")
            .read(b"HELO c\r\n")
            .write(b"250 relay.test greets c\r\n")
            .read(b"RCPT TO:<b@example.com>\r\n")
            .write(b"503 Error: need MAIL command\r\n")
            .read(b"MAIL FROM:<a@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"503 Error: need RCPT command\r\n")
            .read(b"MAIL FROM:<a@example.com>\r\n")
            .write(b"503 Error: nested MAIL command\r\n")
            .read(b"RSET\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"503 Error: need MAIL command\r\n")
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_unsupported_and_malformed() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"FROB\r\n")
            .write(b"500 Error: command \"FROB\" not recognized\r\n")
            .read(b"STARTTLS\r\n")
            .write(b"502 Error: command \"STARTTLS\" not implemented\r\n")
            .read(b"HELO c\r\n")
            .write(b"250 relay.test greets c\r\n")
            .read(b"MAIL FROM:<not-an-address>\r\n")
            .write(b"501 Error: Invalid email address: Address must contain @\r\n")
            .read(b"VRFY bob\r\n")
            .write(b"252 Cannot VRFY user, but will accept message and attempt delivery\r\n")
            .read(b"NOOP\r\n")
            .write(b"250 OK\r\n")
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"HELO c\r\n")
            .write(b"250 relay.test greets c\r\n")
            .read(b"MAIL FROM:<a@example.com> SIZE=100\r\n")
            .write(b"552 Error: Message exceeds size limit: 100 bytes\r\n")
            .read(b"MAIL FROM:<a@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"RCPT TO:<b@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(&[b"0123456789012345678901234567890123456789\r\n".as_slice(); 2].concat())
            .read(b".\r\n")
            .write(b"552 Error: Message exceeds size limit: 84 bytes\r\n")
            .read(b"MAIL FROM:<a@example.com>\r\n")
            .write(b"250 OK\r\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unterminated_long_line_is_not_buffered() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"HELO c\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .write(b"250 relay.test greets c\r\n250 OK\r\n250 OK\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(&[b'x'; 120])
            .read(&[b'x'; 80])
            .read(b"\r\n.\r\n")
            .write(b"552 Error: Message exceeds size limit: 202 bytes\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 Bye\r\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        Session::new(stream, config(), tx).run().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_transient_failure() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"HELO c\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .write(b"250 relay.test greets c\r\n250 OK\r\n250 OK\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"hello\r\n.\r\n")
            .write(b"451 Requested action aborted: local error in processing\r\n")
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        Session::new(stream, config(), tx).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_during_data() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"HELO c\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .write(b"250 relay.test greets c\r\n250 OK\r\n250 OK\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"partial\r\n")
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = Session::new(stream, config(), tx).run().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_overlong_command_line_closes_session() {
        let line = vec![b'A'; MAX_COMMAND_LINE + 10];
        let stream = Builder::new()
            .write(GREETING)
            .read(&line)
            .write(b"421 relay.test Protocol error: Command line too long, closing connection\r\n")
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = Session::new(stream, config(), tx).run().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
