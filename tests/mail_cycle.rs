//! Integration tests for the mail command cycle.
//!
//! Each test builds a controller over a temp root with a scripted mailbox and
//! a scripted text model, then drives poll / advance steps directly.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;

use topic_press::channels::{ConnectivityReport, InboundMessage, MailTransport, OutboundReply};
use topic_press::config::ControllerConfig;
use topic_press::controller::{CycleController, ERROR_REPLY_PREFIX};
use topic_press::dispatch::Dispatcher;
use topic_press::error::{ChannelError, LlmError};
use topic_press::llm::{NoImages, TextGenerator};
use topic_press::pipeline::prompts::{ARTICLE_SYSTEM, QUALITY_SYSTEM, RESEARCH_SYSTEM};
use topic_press::pipeline::{GenerationPipeline, PipelineSettings};
use topic_press::publish::NoopPublisher;
use topic_press::site::Site;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const COACH: &str = "coach@example.com";

/// Hands out one batch of messages per fetch and records everything sent.
#[derive(Default)]
struct Mailbox {
    batches: Mutex<VecDeque<Vec<InboundMessage>>>,
    sent: Mutex<Vec<OutboundReply>>,
}

impl Mailbox {
    fn with_batch(messages: Vec<InboundMessage>) -> Self {
        let mailbox = Self::default();
        mailbox.batches.lock().unwrap().push_back(messages);
        mailbox
    }

    fn sent(&self) -> Vec<OutboundReply> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for Mailbox {
    fn name(&self) -> &str {
        "mailbox"
    }

    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(reply.clone());
        Ok(())
    }

    async fn check(&self) -> Result<ConnectivityReport, ChannelError> {
        Ok(ConnectivityReport::default())
    }
}

/// Stub text model (no real API calls). Every draft passes the gate.
#[derive(Default)]
struct StubWriter {
    /// Research for a topic whose title contains this fails with HTTP 500.
    fail_research_for: Option<&'static str>,
    /// A question containing this panics mid-dispatch.
    panic_on: Option<&'static str>,
}

#[async_trait]
impl TextGenerator for StubWriter {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        if system == RESEARCH_SYSTEM && self.fail_research_for.is_some_and(|t| prompt.contains(t)) {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "HTTP 500".into(),
            });
        }
        if self.panic_on.is_some_and(|p| prompt.contains(p)) {
            panic!("writer blew up on {prompt:?}");
        }
        Ok(match system {
            RESEARCH_SYSTEM => "- Kontinentalgriff".to_string(),
            ARTICLE_SYSTEM => "<h2>Grundlagen</h2><p>Text</p>\n|||META|||\n\
                 {\"meta_description\": \"Kurz erklaert\", \"howto_steps\": []}"
                .to_string(),
            QUALITY_SYSTEM => "GESAMT: 9\nFEEDBACK: Gut.".to_string(),
            _ => "Der Blog erscheint auf Deutsch.".to_string(),
        })
    }
}

fn message(sender: &str, subject: &str, body: &str, id: &str) -> InboundMessage {
    InboundMessage {
        sender: sender.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        correlation_id: id.to_string(),
    }
}

fn write_catalog(root: &Path) {
    let catalog = json!({
        "site": { "base_url": "https://lab.example.org", "name": "AI Tennis Lab" },
        "topics": [
            { "slug": "vorhand-topspin-technik", "title": "Vorhand Topspin Technik",
              "category": "Grundschlaege", "difficulty": "Mittel", "keywords": ["vorhand", "topspin"] },
            { "slug": "volley-grundlagen", "title": "Volley Grundlagen",
              "category": "Netzspiel", "difficulty": "Einsteiger", "keywords": ["volley", "netz"] }
        ]
    });
    std::fs::write(root.join("topics.json"), catalog.to_string()).unwrap();
}

fn controller(root: &Path, mailbox: Arc<Mailbox>, auto_interval: Option<Duration>) -> CycleController {
    controller_with(root, mailbox, auto_interval, StubWriter::default())
}

fn controller_with(
    root: &Path,
    mailbox: Arc<Mailbox>,
    auto_interval: Option<Duration>,
    writer: StubWriter,
) -> CycleController {
    let site = Site::new(root.join("docs"));
    site.ensure_dirs().unwrap();
    let writer: Arc<dyn TextGenerator> = Arc::new(writer);
    let pipeline = GenerationPipeline::new(
        Arc::clone(&writer),
        Arc::new(NoImages),
        Arc::new(NoopPublisher),
        site,
        PipelineSettings {
            step_delay: Duration::ZERO,
            ..PipelineSettings::default()
        },
    );
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(10),
        auto_interval,
        ..ControllerConfig::new(COACH)
    };
    CycleController::new(
        mailbox,
        Dispatcher::new(pipeline, writer),
        root.join("topics.json"),
        config,
    )
}

#[tokio::test]
async fn malformed_message_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::with_batch(vec![
        message(COACH, "", "", ""),
        message("stranger@example.com", "status", "", "<x@mail>"),
        message(COACH, "Status", "", "<s@mail>"),
    ]));
    let controller = controller(dir.path(), mailbox.clone(), None);

    let summary = timeout(TEST_TIMEOUT, controller.poll_once())
        .await
        .expect("poll timed out")
        .unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.answered, 2);
    assert_eq!(summary.failed, 0);

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.to == COACH));
    assert_eq!(sent[0].body, "Der Blog erscheint auf Deutsch.");
    assert!(sent[0].in_reply_to.is_none());
    assert_eq!(sent[1].subject, "Re: Status");
    assert_eq!(sent[1].in_reply_to.as_deref(), Some("<s@mail>"));
    assert!(sent[1].body.contains("Artikel gesamt: 0/2"));
}

#[tokio::test]
async fn failing_and_panicking_commands_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::with_batch(vec![
        message(COACH, "Kurze Frage", "was ist kaputt?", "<q@mail>"),
        message(COACH, "neuer artikel ueber volley", "", "<n@mail>"),
        message(COACH, "Status", "", "<s@mail>"),
    ]));
    let writer = StubWriter {
        fail_research_for: Some("Volley"),
        panic_on: Some("kaputt"),
    };
    let controller = controller_with(dir.path(), mailbox.clone(), None, writer);

    let summary = timeout(TEST_TIMEOUT, controller.poll_once())
        .await
        .expect("poll timed out")
        .unwrap();
    assert_eq!(summary.answered, 1);
    assert_eq!(summary.failed, 2);

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].body.starts_with(ERROR_REPLY_PREFIX));
    assert!(sent[0].body.contains("panic: writer blew up"));
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("<q@mail>"));
    assert!(sent[1].body.starts_with(ERROR_REPLY_PREFIX));
    assert!(sent[1].body.contains("Research failed for volley-grundlagen"));
    assert!(sent[1].body.contains("HTTP 500"));
    assert!(sent[2].body.starts_with("AI Tennis Lab -- Status"));
    assert!(!dir.path().join("docs/artikel/volley-grundlagen.html").exists());
}

#[tokio::test]
async fn failed_advance_is_logged_and_the_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::default());
    mailbox.batches.lock().unwrap().push_back(Vec::new());
    mailbox
        .batches
        .lock()
        .unwrap()
        .push_back(vec![message(COACH, "status", "", "<s@mail>")]);
    let writer = StubWriter {
        fail_research_for: Some("Vorhand"),
        panic_on: None,
    };
    let controller = controller_with(dir.path(), mailbox.clone(), Some(Duration::from_secs(3600)), writer);

    let mut last_advance = None;
    controller.run_iteration(&mut last_advance).await;
    assert!(last_advance.is_some());
    assert!(!dir.path().join("docs/artikel/vorhand-topspin-technik.html").exists());
    assert!(mailbox.sent().is_empty());

    // Next iteration still polls and answers.
    controller.run_iteration(&mut last_advance).await;
    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Re: status");
}

#[tokio::test]
async fn broken_catalog_becomes_an_error_reply() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("topics.json"), "{ not json").unwrap();
    let mailbox = Arc::new(Mailbox::with_batch(vec![message(COACH, "themen", "", "<t@mail>")]));
    let controller = controller(dir.path(), mailbox.clone(), None);

    let summary = controller.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.starts_with(ERROR_REPLY_PREFIX));
    assert!(sent[0].body.contains("topics.json"));
}

#[tokio::test]
async fn new_article_by_mail_then_duplicate_request() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::with_batch(vec![message(
        COACH,
        "neuer artikel ueber volley",
        "",
        "<n@mail>",
    )]));
    mailbox.batches.lock().unwrap().push_back(vec![message(
        COACH,
        "Neuer Artikel ueber Volley",
        "",
        "<d@mail>",
    )]);
    let controller = controller(dir.path(), mailbox.clone(), None);

    controller.poll_once().await.unwrap();
    let article = dir.path().join("docs/artikel/volley-grundlagen.html");
    assert!(article.is_file());
    assert!(dir.path().join("docs/index.html").is_file());
    assert!(dir.path().join("docs/sitemap.xml").is_file());

    controller.poll_once().await.unwrap();
    let sent = mailbox.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].body.starts_with("Neuer Artikel erstellt!"));
    assert!(sent[0].body.contains("Slug: volley-grundlagen"));
    assert!(sent[0].body.contains("Qualitaet: 9/10"));
    assert!(sent[0].body.contains("Bild: Nein"));
    assert!(!sent[0].body.contains("Hinweis"));
    assert!(sent[1].body.starts_with("Artikel existiert bereits: Volley Grundlagen"));
}

#[tokio::test]
async fn first_iteration_advances_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::default());
    let controller = controller(dir.path(), mailbox.clone(), Some(Duration::from_secs(3600)));

    let mut last_advance = None;
    controller.run_iteration(&mut last_advance).await;
    assert!(last_advance.is_some());
    assert!(dir.path().join("docs/artikel/vorhand-topspin-technik.html").is_file());

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, COACH);
    assert_eq!(sent[0].subject, "Neuer Artikel: Vorhand Topspin Technik");
    assert!(sent[0].body.contains("Noch 1 Artikel offen."));

    // Interval not elapsed yet.
    controller.run_iteration(&mut last_advance).await;
    assert!(!dir.path().join("docs/artikel/volley-grundlagen.html").exists());
    assert_eq!(mailbox.sent().len(), 1);
}

#[tokio::test]
async fn advance_with_everything_published_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::default());
    let controller = controller(dir.path(), mailbox.clone(), Some(Duration::from_secs(60)));
    for slug in ["vorhand-topspin-technik", "volley-grundlagen"] {
        std::fs::write(dir.path().join(format!("docs/artikel/{slug}.html")), "<html></html>").unwrap();
    }

    assert!(controller.advance_once().await.is_none());
    assert!(mailbox.sent().is_empty());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let mailbox = Arc::new(Mailbox::default());
    let controller = controller(dir.path(), mailbox, None);

    timeout(
        TEST_TIMEOUT,
        controller.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .expect("controller did not stop");
}
