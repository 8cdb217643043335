//! Shared types for the mailbox pipeline.

// ── Inbound message ─────────────────────────────────────────────────

/// One parsed unread message, produced fresh every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEmail {
    /// Stable identity: `Message-ID`, or `{sender}_{subject}_{handle}`.
    pub id: String,
    /// Opaque transport handle (IMAP sequence number).
    pub handle: String,
    /// Sender address, original case.
    pub sender: String,
    pub subject: String,
    /// Plain-text body, already truncated.
    pub body: String,
}

impl InboundEmail {
    /// Identity used when the message carries no `Message-ID`.
    pub fn fallback_id(sender: &str, subject: &str, handle: &str) -> String {
        format!("{sender}_{subject}_{handle}")
    }

    /// Sender lower-cased, for comparisons.
    pub fn sender_normalized(&self) -> String {
        self.sender.to_lowercase()
    }

    /// Prompt body shared by the spam check and response generation.
    pub fn prompt(&self) -> String {
        format!(
            "From: {}\nSubject: {}\n\n{}",
            self.sender, self.subject, self.body
        )
    }
}

// ── Outgoing reply ──────────────────────────────────────────────────

/// A reply ready for the mail sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: String,
    pub references: String,
}

impl OutgoingReply {
    /// Build a reply to `original` from `from`, threaded on its identity.
    pub fn to(original: &InboundEmail, from: &str, body: impl Into<String>) -> Self {
        Self {
            from: from.to_string(),
            to: original.sender.clone(),
            subject: reply_subject(&original.subject),
            body: body.into(),
            in_reply_to: original.id.clone(),
            references: original.id.clone(),
        }
    }
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Final label from the spam-check service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamVerdict {
    Spam,
    Normal,
}

impl SpamVerdict {
    /// Only an exact `SPAM` (after trim, case-insensitive) counts as spam.
    pub fn from_label(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("spam") {
            Self::Spam
        } else {
            Self::Normal
        }
    }

    pub fn is_spam(self) -> bool {
        self == Self::Spam
    }
}

/// Marker a generated reply uses to flag the incoming message as spam.
pub const SPAM_SIGNAL: &str = "SPAM";

/// Whether generated reply text carries the spam signal.
pub fn response_signals_spam(text: &str) -> bool {
    text.contains(SPAM_SIGNAL)
}

// ── Cycle report ────────────────────────────────────────────────────

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unread ids on the server this cycle (after the window limit).
    pub unread: usize,
    /// Messages fetched and parsed from the batch.
    pub fetched: usize,
    /// Messages the classifier accepted.
    pub accepted: usize,
    /// Messages the classifier rejected.
    pub rejected: usize,
    /// Replies confirmed sent.
    pub replied: usize,
    /// Generated replies withheld because they flagged spam.
    pub flagged_spam: usize,
    /// Per-message failures (fetch, parse, classify, generate, send).
    pub failed: usize,
    /// History records pruned at the end of the cycle.
    pub pruned: usize,
}
