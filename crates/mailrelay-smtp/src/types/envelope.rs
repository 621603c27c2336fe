//! Accepted messages.

use super::Address;
use chrono::{DateTime, Utc};

/// A message accepted by the listener, as handed to the relay queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path; `None` for the null sender `<>`.
    pub mail_from: Option<Address>,
    /// Forward paths, in the order they were accepted.
    pub rcpt_to: Vec<Address>,
    /// Raw message content after dot-unstuffing, CRLF line endings.
    pub data: Vec<u8>,
    /// Instant the final `.` was received.
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    /// Size of the message content in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
