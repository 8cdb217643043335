//! Message pipeline.
//!
//! Every poll cycle moves unread mail through:
//! 1. `BatchCursor::next_batch()`: pick this cycle's page of unread ids
//! 2. `Classifier::evaluate()`: local rules, history, then the remote spam check
//! 3. `ResponseGenerator::generate()` and `MailSender::send()` for accepted mail
//! 4. `HistoryStore::prune()` before sleeping
//!
//! A message is recorded only after its reply has actually been sent.

pub mod classifier;
pub mod cursor;
pub mod poller;
pub mod rules;
pub mod types;

pub use classifier::{Classifier, Decision, SkipReason};
pub use cursor::BatchCursor;
pub use poller::{Poller, PollerDeps, PollerState};
pub use rules::IgnoreList;
pub use types::{CycleReport, InboundEmail, OutgoingReply, SpamVerdict};
