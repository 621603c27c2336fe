//! # mailrelay-smtp
//!
//! A minimal inbound SMTP server (RFC 5321) that accepts mail from local
//! clients and hands each message to the relay as an [`Envelope`].
//!
//! ## Features
//!
//! - **Commands**: HELO, EHLO, MAIL FROM, RCPT TO, DATA, RSET, NOOP, VRFY, QUIT
//! - **Extensions**: 8BITMIME, SIZE, PIPELINING
//! - **Non-blocking hand-off**: messages go to an unbounded channel
//!
//! There is no TLS and no AUTH; bind to a loopback or otherwise trusted
//! interface.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_smtp::Listener;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mailrelay_smtp::Result<()> {
//!     let (queue, mut inbox) = mpsc::unbounded_channel();
//!     let shutdown = CancellationToken::new();
//!
//!     let listener = Listener::bind("127.0.0.1:1587").await?;
//!     tokio::spawn(listener.run(queue, shutdown.clone()));
//!
//!     while let Some(envelope) = inbox.recv().await {
//!         println!("{} bytes for {:?}", envelope.size(), envelope.rcpt_to);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Session states
//!
//! ```text
//! connected ── HELO/EHLO ──→ greeted ── MAIL ──→ mail ── RCPT ──→ rcpt ── DATA ──→ queued
//!                               ↑                                                     │
//!                               └──────────────────── RSET / after DATA ──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
mod listener;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use listener::Listener;
pub use session::{DEFAULT_MAX_MESSAGE_SIZE, Session, SessionConfig};
pub use types::{Address, Envelope, Extension, Reply, ReplyCode};
