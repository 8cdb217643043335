//! Mailbox I/O: IMAP inbound, MIME parsing, SMTP outbound.

pub mod imap;
pub mod parser;
pub mod smtp;
pub mod traits;

pub use imap::ImapTransport;
pub use parser::MimeParser;
pub use smtp::SmtpSender;
pub use traits::{MailSender, MailboxSession, MailboxTransport, MessageParser};
