//! Cycle controller: the single-threaded poll / autonomous-advance loop.
//!
//! Each iteration polls the mailbox and answers every command from the
//! allowed sender, then runs the autonomous advance if its interval has
//! elapsed. Nothing runs concurrently: a generation started from a command
//! and one started by the timer can never overlap.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, PublishedState};
use crate::channels::{InboundMessage, MailTransport, OutboundReply};
use crate::command;
use crate::config::ControllerConfig;
use crate::dispatch::{Dispatcher, remaining_line};
use crate::error::{Error, error_chain};
use crate::pipeline::GenerationOutcome;

/// Prefix of the reply sent when a command fails.
pub const ERROR_REPLY_PREFIX: &str = "Fehler bei der Verarbeitung:";

/// Counters for one poll step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub answered: usize,
    pub failed: usize,
}

pub struct CycleController {
    transport: Arc<dyn MailTransport>,
    dispatcher: Dispatcher,
    catalog_path: PathBuf,
    config: ControllerConfig,
}

impl CycleController {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        dispatcher: Dispatcher,
        catalog_path: impl Into<PathBuf>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            catalog_path: catalog_path.into(),
            config,
        }
    }

    /// Loop until `shutdown` resolves. Shutdown is only observed between
    /// iterations; a running command or generation is never interrupted.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(
            transport = self.transport.name(),
            sender = %self.config.allowed_sender,
            poll_secs = self.config.poll_interval.as_secs(),
            auto_secs = self.config.auto_interval.map(|d| d.as_secs()),
            "Cycle controller started"
        );

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut last_advance = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Cycle controller shutting down");
                    return;
                }
                _ = tick.tick() => {}
            }
            self.run_iteration(&mut last_advance).await;
        }
    }

    /// One loop iteration: poll, then advance if due.
    pub async fn run_iteration(&self, last_advance: &mut Option<Instant>) {
        if let Err(e) = self.poll_once().await {
            error!(error = %error_chain(&e), "Poll cycle failed");
        }

        let now = Instant::now();
        if advance_due(*last_advance, self.config.auto_interval, now) {
            *last_advance = Some(now);
            self.advance_once().await;
        }
    }

    /// Fetch unread mail and answer every message from the allowed sender.
    ///
    /// Only a failed fetch is an error. Per-message failures (including
    /// panics) become error replies and never stop the batch.
    pub async fn poll_once(&self) -> Result<PollSummary, Error> {
        let messages = self.transport.fetch_unread().await?;
        let mut summary = PollSummary {
            fetched: messages.len(),
            ..PollSummary::default()
        };
        if messages.is_empty() {
            return Ok(summary);
        }
        debug!(count = messages.len(), "Processing unread messages");

        for message in &messages {
            if message.sender != self.config.allowed_sender {
                warn!(sender = %message.sender, subject = %message.subject, "Ignoring mail from unknown sender");
                summary.skipped += 1;
                continue;
            }

            let body = match AssertUnwindSafe(self.handle_message(message))
                .catch_unwind()
                .await
            {
                Ok(Ok(reply)) => {
                    summary.answered += 1;
                    reply
                }
                Ok(Err(e)) => {
                    let chain = error_chain(&e);
                    error!(subject = %message.subject, error = %chain, "Command failed");
                    summary.failed += 1;
                    format!("{ERROR_REPLY_PREFIX}\n\n{chain}")
                }
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    error!(subject = %message.subject, panic = %detail, "Command panicked");
                    summary.failed += 1;
                    format!("{ERROR_REPLY_PREFIX}\n\npanic: {detail}")
                }
            };

            let reply = OutboundReply::reply_to(message, body);
            if let Err(e) = self.transport.send(&reply).await {
                error!(to = %reply.to, error = %e, "Failed to send reply");
            }
        }

        info!(
            fetched = summary.fetched,
            answered = summary.answered,
            failed = summary.failed,
            skipped = summary.skipped,
            "Poll cycle done"
        );
        Ok(summary)
    }

    async fn handle_message(&self, message: &InboundMessage) -> Result<String, Error> {
        let (catalog, published) = self.snapshot()?;
        let command = command::parse(&message.subject, &message.body);
        info!(subject = %message.subject, command = command.label(), "Command received");
        self.dispatcher
            .dispatch(&command, &message.body, &catalog, &published)
            .await
    }

    /// Generate the first unpublished topic and notify the allowed sender.
    /// Errors are logged; there is nobody to reply to.
    pub async fn advance_once(&self) -> Option<GenerationOutcome> {
        let (catalog, published) = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %error_chain(&e), "Autonomous advance skipped");
                return None;
            }
        };

        let Some(topic) = catalog.first_unpublished(&published) else {
            info!("All topics published, nothing to advance");
            return None;
        };
        info!(slug = %topic.slug, "Autonomous advance");

        let outcome = match self
            .dispatcher
            .pipeline()
            .generate(
                topic,
                &catalog,
                "",
                &format!("Neuer Artikel (auto): {}", topic.title),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(slug = %topic.slug, error = %error_chain(&e), "Autonomous advance failed");
                return None;
            }
        };

        let remaining = match self.dispatcher.pipeline().site().published() {
            Ok(after) => remaining_line(&catalog, &after),
            Err(e) => {
                warn!(error = %error_chain(&e), "Could not rescan published articles");
                String::new()
            }
        };
        let notification = OutboundReply::notification(
            &self.config.allowed_sender,
            format!("Neuer Artikel: {}", outcome.title),
            advance_notification(&outcome, &remaining, self.config.auto_interval),
        );
        if let Err(e) = self.transport.send(&notification).await {
            error!(error = %e, "Failed to send advance notification");
        }
        Some(outcome)
    }

    fn snapshot(&self) -> Result<(Catalog, PublishedState), Error> {
        let catalog = Catalog::load(&self.catalog_path)?;
        let published = self.dispatcher.pipeline().site().published()?;
        Ok((catalog, published))
    }
}

/// Whether the autonomous advance should run now. The first check after
/// start is always due.
pub fn advance_due(last: Option<Instant>, interval: Option<Duration>, now: Instant) -> bool {
    match (interval, last) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
    }
}

fn advance_notification(outcome: &GenerationOutcome, remaining: &str, interval: Option<Duration>) -> String {
    let mut body = format!(
        "Automatisch generiert!\n\n\
         Titel: {}\n\
         Qualitaet: {}/10\n\
         Bild: {}\n\
         URL: {}\n",
        outcome.title,
        outcome.score,
        if outcome.image.is_some() { "Ja" } else { "Nein" },
        outcome.url,
    );
    if !remaining.is_empty() {
        body.push_str(remaining);
        body.push('\n');
    }
    if let Some(interval) = interval {
        body.push_str(&format!("\nNaechster Artikel in {} Minuten.", interval.as_secs() / 60));
    }
    if !outcome.published {
        body.push_str("\n\nHinweis: Die Veroeffentlichung (git push) ist fehlgeschlagen.");
    }
    body
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
