//! # mailrelay-core
//!
//! Relays locally submitted mail through the Microsoft Graph API.
//!
//! This crate provides:
//! - Environment-based configuration with full validation
//! - Message parsing (headers, multipart, transfer encodings)
//! - Graph `sendMail` delivery
//! - The relay loop tying the mail queue to the token handler

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod message;
pub mod relay;
pub mod sender;

pub use config::{ConfigError, RelayConfig};
pub use error::{Error, Result};
pub use mailrelay_smtp::Envelope;
pub use message::{Mailbox, ParsedMessage};
pub use relay::{RelayLoop, mail_queue, queue_timeout};
pub use sender::{GraphMailSender, MailSender};
