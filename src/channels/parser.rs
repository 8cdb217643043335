//! MIME parsing of raw RFC 5322 bytes into an `InboundEmail`.

use mail_parser::MessageParser as MimeMessageParser;

use crate::channels::traits::MessageParser;
use crate::error::ParseError;
use crate::pipeline::types::InboundEmail;

/// `mail-parser` backed `MessageParser`.
#[derive(Debug, Clone)]
pub struct MimeParser {
    max_body_chars: usize,
}

impl MimeParser {
    pub fn new(max_body_chars: usize) -> Self {
        Self { max_body_chars }
    }
}

impl MessageParser for MimeParser {
    fn parse(&self, handle: &str, raw: &[u8]) -> Result<InboundEmail, ParseError> {
        let parsed = MimeMessageParser::default()
            .parse(raw)
            .ok_or_else(|| ParseError::Malformed {
                handle: handle.to_string(),
            })?;

        let sender = extract_sender(&parsed).ok_or_else(|| ParseError::MissingSender {
            handle: handle.to_string(),
        })?;
        let subject = parsed.subject().unwrap_or_default().to_string();
        let body = truncate_chars(&extract_text(&parsed), self.max_body_chars);

        let id = match parsed.message_id() {
            Some(id) if !id.trim().is_empty() => bracket_id(id.trim()),
            _ => InboundEmail::fallback_id(&sender, &subject, handle),
        };

        Ok(InboundEmail {
            id,
            handle: handle.to_string(),
            sender,
            subject,
            body,
        })
    }
}

/// First `From` address, original case.
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Plain-text body, falling back to tag-stripped HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.into_owned();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// `mail-parser` drops the angle brackets; headers on the wire carry them.
fn bracket_id(id: &str) -> String {
    if id.starts_with('<') && id.ends_with('>') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
