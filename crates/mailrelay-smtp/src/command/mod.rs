//! SMTP command parser.

use crate::error::{Error, Result};
use crate::types::Address;

/// SMTP command received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address; `None` for the null reverse path
        from: Option<Address>,
        /// BODY parameter (7BIT, 8BITMIME)
        body: Option<String>,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address to verify
        address: String,
    },
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// Recognised command the listener does not offer (STARTTLS, AUTH, ...)
    NotImplemented(String),
    /// Unrecognised command verb
    Unknown(String),
}

/// Verbs that are valid SMTP but deliberately unsupported.
const UNSUPPORTED_VERBS: &[&str] = &["STARTTLS", "AUTH", "EXPN", "HELP", "TURN", "ETRN", "BDAT"];

impl Command {
    /// Parses one command line (without the trailing CRLF).
    ///
    /// Unknown and unsupported verbs parse successfully as
    /// [`Command::Unknown`] and [`Command::NotImplemented`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for malformed arguments and
    /// [`Error::InvalidAddress`] for unusable paths.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(verb, args)| (verb, args.trim()));
        let verb = verb.to_ascii_uppercase();

        match verb.as_str() {
            "HELO" => Ok(Self::Helo {
                hostname: required_argument("HELO", args)?,
            }),
            "EHLO" => Ok(Self::Ehlo {
                hostname: required_argument("EHLO", args)?,
            }),
            "MAIL" => parse_mail_from(args),
            "RCPT" => {
                let path = strip_keyword(args, "TO:")?;
                let (address, _params) = split_path(path)?;
                let to = address.ok_or_else(|| Error::InvalidAddress("Empty forward path".into()))?;
                Ok(Self::RcptTo { to })
            }
            "DATA" => no_arguments(Self::Data, args),
            "RSET" => no_arguments(Self::Rset, args),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => no_arguments(Self::Quit, args),
            "VRFY" => Ok(Self::Vrfy {
                address: required_argument("VRFY", args)?,
            }),
            _ if UNSUPPORTED_VERBS.contains(&verb.as_str()) => Ok(Self::NotImplemented(verb)),
            _ => Ok(Self::Unknown(verb)),
        }
    }
}

fn required_argument(verb: &str, args: &str) -> Result<String> {
    if args.is_empty() {
        return Err(Error::Protocol(format!("{verb} requires an argument")));
    }
    Ok(args.to_string())
}

fn no_arguments(command: Command, args: &str) -> Result<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(Error::Protocol("Command takes no arguments".into()))
    }
}

fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Result<&'a str> {
    match args.get(..keyword.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(keyword) => Ok(args[keyword.len()..].trim_start()),
        _ => Err(Error::Protocol(format!("Expected {keyword}<address>"))),
    }
}

/// Splits `<path> [params]` into the address and its parameters.
fn split_path(input: &str) -> Result<(Option<Address>, &str)> {
    let Some(rest) = input.strip_prefix('<') else {
        return Err(Error::InvalidAddress(format!("Path must be enclosed in <>: {input}")));
    };
    let Some((path, params)) = rest.split_once('>') else {
        return Err(Error::InvalidAddress(format!("Unterminated path: {input}")));
    };

    // Source routes (`@a,@b:user@c`) are accepted and ignored.
    let mailbox = path.rsplit_once(':').map_or(path, |(_, mailbox)| mailbox);
    if mailbox.is_empty() {
        return Ok((None, params.trim()));
    }
    Ok((Some(Address::new(mailbox)?), params.trim()))
}

fn parse_mail_from(args: &str) -> Result<Command> {
    let path = strip_keyword(args, "FROM:")?;
    let (from, params) = split_path(path)?;

    let mut body = None;
    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key.to_ascii_uppercase().as_str() {
            "BODY" => body = Some(value.to_ascii_uppercase()),
            "SIZE" => {
                size = Some(
                    value
                        .parse()
                        .map_err(|_| Error::Protocol(format!("Invalid SIZE value: {value}")))?,
                );
            }
            _ => {}
        }
    }

    Ok(Command::MailFrom { from, body, size })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_helo_command() {
        assert_eq!(
            Command::parse("HELO client.example.com").unwrap(),
            Command::Helo {
                hostname: "client.example.com".to_string()
            }
        );
    }

    #[test]
    fn test_ehlo_lowercase() {
        assert_eq!(
            Command::parse("ehlo client.example.com\r\n").unwrap(),
            Command::Ehlo {
                hostname: "client.example.com".to_string()
            }
        );
    }

    #[test]
    fn test_ehlo_requires_hostname() {
        assert!(matches!(Command::parse("EHLO"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_mail_from_simple() {
        assert_eq!(
            Command::parse("MAIL FROM:<sender@example.com>").unwrap(),
            Command::MailFrom {
                from: Some(Address::new("sender@example.com").unwrap()),
                body: None,
                size: None,
            }
        );
    }

    #[test]
    fn test_mail_from_with_params() {
        assert_eq!(
            Command::parse("mail from: <sender@example.com> BODY=8bitmime SIZE=12345").unwrap(),
            Command::MailFrom {
                from: Some(Address::new("sender@example.com").unwrap()),
                body: Some("8BITMIME".to_string()),
                size: Some(12345),
            }
        );
    }

    #[test]
    fn test_mail_from_null_path() {
        assert_eq!(
            Command::parse("MAIL FROM:<>").unwrap(),
            Command::MailFrom {
                from: None,
                body: None,
                size: None,
            }
        );
    }

    #[test]
    fn test_mail_from_bad_size() {
        assert!(matches!(
            Command::parse("MAIL FROM:<a@b.c> SIZE=big"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_mail_from_without_brackets() {
        assert!(matches!(
            Command::parse("MAIL FROM:sender@example.com"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_rcpt_to_command() {
        assert_eq!(
            Command::parse("RCPT TO:<recipient@example.com>").unwrap(),
            Command::RcptTo {
                to: Address::new("recipient@example.com").unwrap()
            }
        );
    }

    #[test]
    fn test_rcpt_to_source_route() {
        assert_eq!(
            Command::parse("RCPT TO:<@relay.example:user@example.com>").unwrap(),
            Command::RcptTo {
                to: Address::new("user@example.com").unwrap()
            }
        );
    }

    #[test]
    fn test_rcpt_to_rejects_empty_and_invalid() {
        assert!(matches!(Command::parse("RCPT TO:<>"), Err(Error::InvalidAddress(_))));
        assert!(matches!(
            Command::parse("RCPT TO:<nobody>"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(Command::parse("RCPT <a@b.c>"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::parse("DATA").unwrap(), Command::Data);
        assert_eq!(Command::parse("RSET").unwrap(), Command::Rset);
        assert_eq!(Command::parse("NOOP").unwrap(), Command::Noop);
        assert_eq!(Command::parse("NOOP ignored").unwrap(), Command::Noop);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
        assert!(Command::parse("DATA now").is_err());
    }

    #[test]
    fn test_vrfy_command() {
        assert_eq!(
            Command::parse("VRFY postmaster").unwrap(),
            Command::Vrfy {
                address: "postmaster".to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_and_unknown() {
        assert_eq!(
            Command::parse("STARTTLS").unwrap(),
            Command::NotImplemented("STARTTLS".to_string())
        );
        assert_eq!(
            Command::parse("auth plain AHVzZXI=").unwrap(),
            Command::NotImplemented("AUTH".to_string())
        );
        assert_eq!(
            Command::parse("FROB x").unwrap(),
            Command::Unknown("FROB".to_string())
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_rcpt_to_keeps_address(
            local in "[a-z0-9._+-]{1,20}",
            domain in "[a-z0-9-]{1,20}\\.[a-z]{2,6}",
            verb in "[rR][cC][pP][tT] [tT][oO]",
        ) {
            let address = format!("{local}@{domain}");
            let command = Command::parse(&format!("{verb}:<{address}>")).unwrap();
            proptest::prop_assert_eq!(command, Command::RcptTo { to: Address::new(address).unwrap() });
        }

        #[test]
        fn prop_parse_never_panics(line in "\\PC{0,80}") {
            let _ = Command::parse(&line);
        }
    }
}
