//! Collaborator contracts consumed by the pipeline.
//!
//! The pipeline only talks to these traits; `imap`, `parser` and `smtp`
//! provide the production implementations.

use async_trait::async_trait;

use crate::error::{ParseError, TransportError};
use crate::pipeline::types::{InboundEmail, OutgoingReply};

/// Opens mailbox sessions. One session per poll cycle.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, TransportError>;
}

/// An authenticated mailbox with one folder selected.
#[async_trait]
pub trait MailboxSession: Send {
    /// Unread message handles, latest first.
    async fn list_unread(&mut self) -> Result<Vec<String>, TransportError>;

    /// Raw RFC 5322 bytes of one message. Must not mark it read.
    async fn fetch(&mut self, handle: &str) -> Result<Vec<u8>, TransportError>;

    /// Flag a message as read.
    async fn mark_seen(&mut self, handle: &str) -> Result<(), TransportError>;

    /// End the session. Failures are not reported.
    async fn close(&mut self);
}

/// Turns raw message bytes into an `InboundEmail`.
pub trait MessageParser: Send + Sync {
    fn parse(&self, handle: &str, raw: &[u8]) -> Result<InboundEmail, ParseError>;
}

/// Delivers replies.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, reply: &OutgoingReply) -> Result<(), TransportError>;
}
