//! Mailbox autoresponder: polls IMAP, filters, answers with an LLM over SMTP.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
