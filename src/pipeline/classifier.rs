//! Reply decision for a single message.
//!
//! Rules run in a fixed order and short-circuit, cheapest first:
//! 1. automated sender, ignored sender, or our own address → skip
//! 2. already answered (history) → skip
//! 3. remote spam check → skip and ignore the sender on `SPAM`
//! 4. otherwise respond
//!
//! A failed spam check is not a rejection. It surfaces as
//! `ClassifyError::Unavailable` so the caller leaves the message pending.

use std::sync::Arc;

use tracing::debug;

use crate::error::ClassifyError;
use crate::llm::SpamClassifier;
use crate::pipeline::rules::{IgnoreList, matches_any_token};
use crate::pipeline::types::InboundEmail;
use crate::store::HistoryStore;

/// Why a message will not be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sender contains a fixed automated-sender marker.
    AutomatedSender,
    /// Sender matches a token in the ignore list.
    IgnoredSender,
    /// Mail from the account to itself.
    OwnAddress,
    /// History already has `responded = true` for this identity.
    AlreadyAnswered,
    /// The spam check labelled it `SPAM`.
    Spam,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::AutomatedSender => "automated sender",
            Self::IgnoredSender => "ignored sender",
            Self::OwnAddress => "own address",
            Self::AlreadyAnswered => "already answered",
            Self::Spam => "spam",
        }
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Respond,
    Skip(SkipReason),
}

impl Decision {
    pub fn should_respond(self) -> bool {
        self == Self::Respond
    }
}

/// Decides which messages deserve an automatic reply.
pub struct Classifier {
    /// Lower-cased account address.
    account_address: String,
    /// Lower-cased tokens that are never evicted, unlike the ignore list.
    automated_markers: Vec<String>,
    spam: Arc<dyn SpamClassifier>,
}

impl Classifier {
    pub fn new<I, S>(account_address: &str, automated_markers: I, spam: Arc<dyn SpamClassifier>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            account_address: account_address.trim().to_lowercase(),
            automated_markers: automated_markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            spam,
        }
    }

    /// Run the rules for `email`.
    ///
    /// May add the sender to `ignore` when the spam check says `SPAM`.
    pub async fn evaluate(
        &self,
        email: &InboundEmail,
        history: &HistoryStore,
        ignore: &mut IgnoreList,
    ) -> Result<Decision, ClassifyError> {
        if let Some(reason) = self.local_rejection(email) {
            return Ok(Decision::Skip(reason));
        }
        if ignore.contains(&email.sender) {
            return Ok(Decision::Skip(SkipReason::IgnoredSender));
        }

        if history.has_responded(&email.id) {
            return Ok(Decision::Skip(SkipReason::AlreadyAnswered));
        }

        let verdict = self.spam.classify(email).await?;
        if verdict.is_spam() {
            ignore.add(&email.sender);
            return Ok(Decision::Skip(SkipReason::Spam));
        }

        debug!(id = %email.id, sender = %email.sender, "Message accepted for reply");
        Ok(Decision::Respond)
    }

    /// `true` if `email` should get a reply; see [`Classifier::evaluate`].
    pub async fn should_respond(
        &self,
        email: &InboundEmail,
        history: &HistoryStore,
        ignore: &mut IgnoreList,
    ) -> Result<bool, ClassifyError> {
        Ok(self.evaluate(email, history, ignore).await?.should_respond())
    }

    fn local_rejection(&self, email: &InboundEmail) -> Option<SkipReason> {
        if matches_any_token(&self.automated_markers, &email.sender) {
            return Some(SkipReason::AutomatedSender);
        }
        if email.sender_normalized().trim() == self.account_address {
            return Some(SkipReason::OwnAddress);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::error::LlmError;
    use crate::pipeline::types::SpamVerdict;

    const SEED: [&str; 3] = ["noreply", "donotreply", "mailer-daemon"];

    /// Spam check with a fixed answer that counts its calls.
    struct FixedSpamCheck {
        answer: Option<SpamVerdict>,
        calls: AtomicUsize,
    }

    impl FixedSpamCheck {
        fn new(answer: Option<SpamVerdict>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpamClassifier for FixedSpamCheck {
        async fn classify(&self, _email: &InboundEmail) -> Result<SpamVerdict, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.ok_or_else(|| LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "unreachable".into(),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        history: HistoryStore,
        ignore: IgnoreList,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let history = HistoryStore::load(dir.path().join("history.json"));
        Fixture {
            _dir: dir,
            history,
            ignore: IgnoreList::new(SEED, 50),
        }
    }

    fn email(id: &str, sender: &str) -> InboundEmail {
        InboundEmail {
            id: id.into(),
            handle: "1".into(),
            sender: sender.into(),
            subject: "Hi".into(),
            body: "Hello there".into(),
        }
    }

    fn classifier(spam: Arc<FixedSpamCheck>) -> Classifier {
        Classifier::new("Me@Example.com", SEED, spam)
    }

    #[tokio::test]
    async fn normal_mail_is_accepted_then_idempotent() {
        let mut fx = fixture();
        let spam = FixedSpamCheck::new(Some(SpamVerdict::Normal));
        let classifier = classifier(spam.clone());
        let msg = email("<1@example.com>", "alice@example.com");

        assert!(
            classifier
                .should_respond(&msg, &fx.history, &mut fx.ignore)
                .await
                .unwrap()
        );

        fx.history
            .record(&msg.id, &msg.sender, &msg.subject, Utc::now());

        let decision = classifier
            .evaluate(&msg, &fx.history, &mut fx.ignore)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip(SkipReason::AlreadyAnswered));
        // History short-circuits before the remote check.
        assert_eq!(spam.calls(), 1);
    }

    #[tokio::test]
    async fn spam_rejects_and_ignores_sender() {
        let mut fx = fixture();
        let classifier = classifier(FixedSpamCheck::new(Some(SpamVerdict::Spam)));
        let msg = email("<2@ads.com>", "promo@ads.com");

        let decision = classifier
            .evaluate(&msg, &fx.history, &mut fx.ignore)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip(SkipReason::Spam));
        assert!(fx.ignore.iter().any(|t| t == "promo@ads.com"));
        assert!(fx.history.is_empty());
    }

    #[tokio::test]
    async fn ignored_sender_skips_remote_check() {
        let mut fx = fixture();
        fx.ignore.add("promo@ads.com");
        let spam = FixedSpamCheck::new(Some(SpamVerdict::Normal));
        let classifier = classifier(spam.clone());

        let decision = classifier
            .evaluate(&email("<3@ads.com>", "Promo@Ads.com"), &fx.history, &mut fx.ignore)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip(SkipReason::IgnoredSender));
        assert_eq!(spam.calls(), 0);
    }

    #[tokio::test]
    async fn own_address_is_never_answered() {
        let mut fx = fixture();
        let spam = FixedSpamCheck::new(Some(SpamVerdict::Normal));
        let classifier = classifier(spam.clone());

        let decision = classifier
            .evaluate(&email("<4@example.com>", "ME@example.COM"), &fx.history, &mut fx.ignore)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip(SkipReason::OwnAddress));
        assert_eq!(spam.calls(), 0);
    }

    #[tokio::test]
    async fn automated_senders_are_never_answered() {
        let mut fx = fixture();
        let spam = FixedSpamCheck::new(Some(SpamVerdict::Normal));
        let classifier = classifier(spam.clone());

        for sender in [
            "MAILER-DAEMON@mx.example.org",
            "noreply@github.com",
            "DoNotReply@bank.example",
        ] {
            let decision = classifier
                .evaluate(&email("<5@x>", sender), &fx.history, &mut fx.ignore)
                .await
                .unwrap();
            assert_eq!(decision, Decision::Skip(SkipReason::AutomatedSender), "{sender}");
        }
        assert_eq!(spam.calls(), 0);
    }

    #[tokio::test]
    async fn automated_markers_survive_ignore_list_eviction() {
        let mut fx = fixture();
        fx.ignore = IgnoreList::new(SEED, 3);
        for i in 0..3 {
            fx.ignore.add(&format!("spammer{i}@spam.example"));
        }
        assert!(!fx.ignore.contains("noreply@github.com"));

        let classifier = classifier(FixedSpamCheck::new(Some(SpamVerdict::Normal)));
        let decision = classifier
            .evaluate(&email("<6@x>", "noreply@github.com"), &fx.history, &mut fx.ignore)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip(SkipReason::AutomatedSender));
    }

    #[tokio::test]
    async fn unavailable_spam_check_is_an_error_not_a_rejection() {
        let mut fx = fixture();
        let classifier = classifier(FixedSpamCheck::new(None));
        let msg = email("<7@example.com>", "bob@example.com");

        let result = classifier.evaluate(&msg, &fx.history, &mut fx.ignore).await;
        assert!(matches!(result, Err(ClassifyError::Unavailable(_))));
        assert!(!fx.ignore.contains("bob@example.com"));
        assert!(!fx.history.has_responded(&msg.id));
    }

    #[tokio::test]
    async fn answered_identity_rejected_regardless_of_other_fields() {
        let mut fx = fixture();
        fx.history
            .record("<8@example.com>", "someone@example.com", "Old", Utc::now());
        let classifier = classifier(FixedSpamCheck::new(Some(SpamVerdict::Normal)));

        let mut msg = email("<8@example.com>", "different@example.org");
        msg.subject = "Completely new subject".into();
        assert!(
            !classifier
                .should_respond(&msg, &fx.history, &mut fx.ignore)
                .await
                .unwrap()
        );
    }
}
