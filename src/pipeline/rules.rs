//! Sender rules: the bounded ignore list and automated-sender markers.
//!
//! A stored token matches any sender address that contains it, so a single
//! `mailer-daemon` token covers every bounce address regardless of domain.

use std::collections::VecDeque;

use tracing::{debug, info};

/// Whether any token is a substring of `sender` (case-insensitive).
///
/// Tokens are expected to be lower-case already.
pub fn matches_any_token<'a>(tokens: impl IntoIterator<Item = &'a String>, sender: &str) -> bool {
    let sender = sender.to_lowercase();
    tokens.into_iter().any(|token| sender.contains(token.as_str()))
}

/// Bounded, insertion-ordered set of lower-cased sender tokens.
///
/// Never holds more than `capacity` tokens; inserting into a full list evicts
/// the oldest token first. Lives in memory only.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    tokens: VecDeque<String>,
    capacity: usize,
}

impl IgnoreList {
    /// Create a list pre-populated with `seed`.
    ///
    /// If the seed is larger than `capacity`, only its last `capacity`
    /// tokens are kept.
    pub fn new<I, S>(seed: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self {
            tokens: VecDeque::with_capacity(capacity),
            capacity,
        };
        for token in seed {
            list.add(token.as_ref());
        }
        list
    }

    /// Case-insensitive substring-or-exact membership check.
    pub fn contains(&self, sender: &str) -> bool {
        matches_any_token(&self.tokens, sender)
    }

    /// Insert `sender` (lower-cased). Exact duplicates are a no-op.
    ///
    /// Returns `true` if the token was inserted.
    pub fn add(&mut self, sender: &str) -> bool {
        let token = sender.trim().to_lowercase();
        if token.is_empty() || self.capacity == 0 || self.tokens.contains(&token) {
            return false;
        }

        if self.tokens.len() >= self.capacity
            && let Some(evicted) = self.tokens.pop_front()
        {
            debug!(evicted = %evicted, "Ignore list full, evicting oldest token");
        }

        info!(sender = %token, "Sender added to ignore list");
        self.tokens.push_back(token);
        true
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}
