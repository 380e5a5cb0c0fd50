//! One-shot batch generation (`generate` mode).
//!
//! Generates the next N unpublished topics with the larger retry budget,
//! checks every link on each new page and mails a single summary report.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::catalog::{Catalog, Topic};
use crate::channels::{MailTransport, OutboundReply};
use crate::error::{Error, error_chain};
use crate::pipeline::{GenerationOutcome, GenerationPipeline};
use crate::site::links::{BrokenLink, check_links};

/// How many topics to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    Count(usize),
    All,
}

/// One generated article plus its link check.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub outcome: GenerationOutcome,
    pub broken_links: Vec<BrokenLink>,
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    /// `(title, error chain)` for topics whose generation failed.
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.failures.is_empty()
    }
}

/// Summary recipient.
pub struct Notifier {
    pub transport: Arc<dyn MailTransport>,
    pub to: String,
}

pub struct BatchRunner {
    pipeline: GenerationPipeline,
    catalog_path: PathBuf,
    http: reqwest::Client,
    notifier: Option<Notifier>,
}

impl BatchRunner {
    pub fn new(
        pipeline: GenerationPipeline,
        catalog_path: impl Into<PathBuf>,
        http: reqwest::Client,
        notifier: Option<Notifier>,
    ) -> Self {
        Self {
            pipeline,
            catalog_path: catalog_path.into(),
            http,
            notifier,
        }
    }

    pub async fn run(&self, size: BatchSize) -> Result<BatchReport, Error> {
        let catalog = Catalog::load(&self.catalog_path)?;
        let site = self.pipeline.site();
        let published = site.published()?;

        let limit = match size {
            BatchSize::Count(n) => n,
            BatchSize::All => catalog.topics.len(),
        };
        let topics: Vec<Topic> = catalog.remaining(&published).take(limit).cloned().collect();

        let mut report = BatchReport::default();
        if topics.is_empty() {
            info!("All topics published, rebuilding site only");
            site.rebuild(&catalog, &published)?;
            return Ok(report);
        }

        info!(count = topics.len(), "Batch generation started");
        for (i, topic) in topics.iter().enumerate() {
            info!(n = i + 1, of = topics.len(), slug = %topic.slug, "Batch item");
            let commit_message = format!("Neuer Artikel: {}", topic.title);
            match self.pipeline.generate(topic, &catalog, "", &commit_message).await {
                Ok(outcome) => {
                    let broken_links =
                        match check_links(&outcome.artifact_path, site.docs_dir(), &self.http).await {
                            Ok(broken) => broken,
                            Err(e) => {
                                warn!(slug = %topic.slug, error = %error_chain(&e), "Link check failed");
                                Vec::new()
                            }
                        };
                    report.entries.push(BatchEntry {
                        outcome,
                        broken_links,
                    });
                }
                Err(e) => {
                    let chain = error_chain(&e);
                    error!(slug = %topic.slug, error = %chain, "Batch item failed");
                    report.failures.push((topic.title.clone(), chain));
                }
            }
        }

        self.notify(&catalog, &report).await;
        Ok(report)
    }

    async fn notify(&self, catalog: &Catalog, report: &BatchReport) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if report.is_empty() {
            return;
        }
        let message = OutboundReply::notification(
            &notifier.to,
            format!("{}: {} neue Artikel generiert", catalog.site.name, report.entries.len()),
            summary_body(&catalog.site.name, report),
        );
        if let Err(e) = notifier.transport.send(&message).await {
            warn!(error = %e, "Failed to send batch summary");
        }
    }
}

/// Plain-text summary mailed after a batch.
pub fn summary_body(site_name: &str, report: &BatchReport) -> String {
    let mut out = format!("{site_name} -- Pipeline-Bericht\n");
    for entry in &report.entries {
        let o = &entry.outcome;
        let _ = write!(out, "\nArtikel: {}\n  Qualitaet: {}/10\n  URL: {}\n", o.title, o.score, o.url);
        if !entry.broken_links.is_empty() {
            let _ = writeln!(out, "  Fehlerhafte Links: {}", entry.broken_links.len());
            for link in &entry.broken_links {
                let _ = writeln!(out, "    - {link}");
            }
        }
        if !o.published {
            out.push_str("  Veroeffentlichung fehlgeschlagen\n");
        }
    }
    for (title, chain) in &report.failures {
        let _ = write!(out, "\nFEHLER: {title}\n  {chain}\n");
    }
    out
}
