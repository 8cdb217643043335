//! Poll loop: fetch a page of unread mail, classify, reply, prune, sleep.
//!
//! The loop is strictly sequential and owns all mutable state through
//! `PollerState`. Nothing inside a cycle is fatal: per-message failures are
//! logged and the message is left unread and unrecorded, so the next pass
//! naturally retries it. A cycle-level error or panic is logged and the loop
//! carries on after the normal sleep.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{MailSender, MailboxSession, MailboxTransport, MessageParser};
use crate::config::ResponderConfig;
use crate::error::TransportError;
use crate::llm::{ResponseGenerator, SpamClassifier};
use crate::pipeline::classifier::{Classifier, Decision};
use crate::pipeline::cursor::BatchCursor;
use crate::pipeline::rules::IgnoreList;
use crate::pipeline::types::{CycleReport, InboundEmail, OutgoingReply, response_signals_spam};
use crate::store::HistoryStore;

/// Mutable state carried from one cycle to the next.
#[derive(Debug)]
pub struct PollerState {
    pub history: HistoryStore,
    pub ignore: IgnoreList,
    pub cursor: BatchCursor,
}

impl PollerState {
    /// Load history (pruning it once) and seed the ignore list.
    pub fn load(config: &ResponderConfig) -> Self {
        let mut history = HistoryStore::load(&config.history_path);
        history.prune(config.retention_days, Utc::now());

        Self {
            history,
            ignore: IgnoreList::new(&config.ignore_seed, config.ignore_capacity),
            cursor: BatchCursor::new(),
        }
    }
}

/// External collaborators the loop drives.
pub struct PollerDeps {
    pub transport: Arc<dyn MailboxTransport>,
    pub parser: Arc<dyn MessageParser>,
    pub spam: Arc<dyn SpamClassifier>,
    pub responder: Arc<dyn ResponseGenerator>,
    pub sender: Arc<dyn MailSender>,
}

/// The autoresponder loop.
pub struct Poller {
    config: ResponderConfig,
    account_address: String,
    classifier: Classifier,
    transport: Arc<dyn MailboxTransport>,
    parser: Arc<dyn MessageParser>,
    responder: Arc<dyn ResponseGenerator>,
    sender: Arc<dyn MailSender>,
}

impl Poller {
    pub fn new(config: ResponderConfig, account_address: &str, deps: PollerDeps) -> Self {
        let classifier = Classifier::new(account_address, &config.ignore_seed, deps.spam);
        Self {
            config,
            account_address: account_address.to_string(),
            classifier,
            transport: deps.transport,
            parser: deps.parser,
            responder: deps.responder,
            sender: deps.sender,
        }
    }

    /// Spawn the loop on the runtime.
    ///
    /// Returns a `JoinHandle` yielding the final state, and a shutdown flag
    /// checked between cycles.
    pub fn spawn(self, state: PollerState) -> (JoinHandle<PollerState>, Arc<AtomicBool>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move { self.run(state, &shutdown).await });

        (handle, shutdown_flag)
    }

    /// Cycle until `shutdown` is set.
    pub async fn run(&self, mut state: PollerState, shutdown: &AtomicBool) -> PollerState {
        info!(
            address = %self.account_address,
            interval_secs = self.config.poll_interval.as_secs(),
            page_size = self.config.page_size,
            "Autoresponder started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Autoresponder shutting down");
                return state;
            }

            match AssertUnwindSafe(self.run_cycle(&mut state))
                .catch_unwind()
                .await
            {
                Ok(Ok(report)) => info!(
                    unread = report.unread,
                    fetched = report.fetched,
                    accepted = report.accepted,
                    rejected = report.rejected,
                    replied = report.replied,
                    flagged_spam = report.flagged_spam,
                    failed = report.failed,
                    pruned = report.pruned,
                    "Cycle complete"
                ),
                Ok(Err(e)) => error!(error = %e, "Error in the main loop"),
                Err(_) => error!("Poll cycle panicked; continuing with the next cycle"),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One full fetch → classify → respond → prune pass.
    ///
    /// History is pruned even when the mailbox could not be reached.
    pub async fn run_cycle(&self, state: &mut PollerState) -> Result<CycleReport, TransportError> {
        info!("Checking for new emails...");
        let mut report = CycleReport::default();

        let outcome = self.process_mailbox(state, &mut report).await;
        report.pruned = state
            .history
            .prune(self.config.retention_days, Utc::now());

        outcome.map(|()| report)
    }

    async fn process_mailbox(
        &self,
        state: &mut PollerState,
        report: &mut CycleReport,
    ) -> Result<(), TransportError> {
        let mut session = self.transport.connect().await?;
        let outcome = self.process_session(session.as_mut(), state, report).await;
        session.close().await;
        outcome
    }

    async fn process_session(
        &self,
        session: &mut dyn MailboxSession,
        state: &mut PollerState,
        report: &mut CycleReport,
    ) -> Result<(), TransportError> {
        // FETCHING
        let unread = session.list_unread().await?;
        report.unread = unread.len();
        let batch = state
            .cursor
            .next_batch(&unread, self.config.page_size)
            .to_vec();

        let emails = self.fetch_batch(session, &batch, report).await;
        report.fetched = emails.len();

        // CLASSIFYING
        let mut accepted = Vec::new();
        for email in emails {
            match self
                .classifier
                .evaluate(&email, &state.history, &mut state.ignore)
                .await
            {
                Ok(Decision::Respond) => {
                    info!(sender = %email.sender, subject = %email.subject, "E-mail accepted for reply");
                    accepted.push(email);
                }
                Ok(Decision::Skip(reason)) => {
                    info!(
                        sender = %email.sender,
                        subject = %email.subject,
                        reason = reason.label(),
                        "Passthrough email"
                    );
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!(id = %email.id, error = %e, "Cannot classify email, leaving it for the next cycle");
                    report.failed += 1;
                }
            }
        }
        report.accepted = accepted.len();

        // RESPONDING
        for email in &accepted {
            self.respond(session, state, email, report).await;
        }
        Ok(())
    }

    /// Fetch and parse each handle once; failures skip just that message.
    async fn fetch_batch(
        &self,
        session: &mut dyn MailboxSession,
        batch: &[String],
        report: &mut CycleReport,
    ) -> Vec<InboundEmail> {
        let mut seen_handles = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut emails = Vec::with_capacity(batch.len());

        for handle in batch {
            if !seen_handles.insert(handle.as_str()) {
                continue;
            }
            debug!(handle = %handle, "Processing email");

            let raw = match session.fetch(handle).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to fetch email");
                    report.failed += 1;
                    continue;
                }
            };

            match self.parser.parse(handle, &raw) {
                Ok(email) => {
                    if seen_ids.insert(email.id.clone()) {
                        emails.push(email);
                    } else {
                        debug!(id = %email.id, "Duplicate message identity in batch, skipping");
                    }
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to parse email");
                    report.failed += 1;
                }
            }
        }
        emails
    }

    async fn respond(
        &self,
        session: &mut dyn MailboxSession,
        state: &mut PollerState,
        email: &InboundEmail,
        report: &mut CycleReport,
    ) {
        // An earlier reply in this batch may have flagged the same sender.
        if state.ignore.contains(&email.sender) {
            info!(sender = %email.sender, "Sender ignored since classification, not replying");
            report.rejected += 1;
            return;
        }

        let text = match self.responder.generate(email).await {
            Ok(text) => text,
            Err(e) => {
                error!(id = %email.id, error = %e, "Error generating response");
                report.failed += 1;
                return;
            }
        };

        if response_signals_spam(&text) {
            info!(sender = %email.sender, "Generated response flagged the email as spam, not sending");
            state.ignore.add(&email.sender);
            report.flagged_spam += 1;
            return;
        }

        let reply = OutgoingReply::to(email, &self.account_address, text);
        if let Err(e) = self.sender.send(&reply).await {
            error!(to = %reply.to, error = %e, "E-mail sending error");
            report.failed += 1;
            return;
        }

        state
            .history
            .record(&email.id, &email.sender, &email.subject, Utc::now());
        report.replied += 1;
        info!(sender = %email.sender, subject = %email.subject, "Answer sent");

        if self.config.mark_answered_seen
            && let Err(e) = session.mark_seen(&email.handle).await
        {
            warn!(handle = %email.handle, error = %e, "Failed to mark answered email as seen");
        }
    }
}
