//! Command dispatcher: routes a parsed [`Command`] to its handler and
//! composes the reply text.
//!
//! Handlers share no state across commands. Generation only happens for a
//! resolved topic whose published-state allows it; misses are ordinary
//! replies, not errors.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::info;

use crate::catalog::{Catalog, PublishedState};
use crate::command::{Command, resolve};
use crate::error::Error;
use crate::llm::TextGenerator;
use crate::pipeline::{GenerationOutcome, GenerationPipeline};

/// Feedback used when a rework request carries no text of its own.
pub const DEFAULT_REWORK_FEEDBACK: &str = "Bitte ueberarbeite und verbessere den Artikel.";

pub struct Dispatcher {
    pipeline: GenerationPipeline,
    writer: Arc<dyn TextGenerator>,
}

impl Dispatcher {
    pub fn new(pipeline: GenerationPipeline, writer: Arc<dyn TextGenerator>) -> Self {
        Self { pipeline, writer }
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    /// Handle one command. `body` is the request's body text, used as rework
    /// feedback.
    pub async fn dispatch(
        &self,
        command: &Command,
        body: &str,
        catalog: &Catalog,
        published: &PublishedState,
    ) -> Result<String, Error> {
        info!(command = command.label(), "Dispatching command");
        match command {
            Command::ListTopics => Ok(topic_list(catalog, published)),
            Command::Status => Ok(status_report(catalog, published)),
            Command::GenerateNew(term) => self.generate_new(term, catalog, published).await,
            Command::Rework(term) => self.rework(term, body, catalog, published).await,
            Command::Question(text) => self.answer(text, catalog).await,
        }
    }

    async fn generate_new(
        &self,
        term: &str,
        catalog: &Catalog,
        published: &PublishedState,
    ) -> Result<String, Error> {
        let Some(resolution) = resolve(term, &catalog.topics) else {
            info!(term, "No topic matched");
            return Ok(not_found_with_topics(term, catalog));
        };
        let topic = resolution.topic;
        info!(term, slug = %topic.slug, score = resolution.score, "Topic resolved");

        if published.contains(&topic.slug) {
            return Ok(format!(
                "Artikel existiert bereits: {}\n\
                 URL: {}\n\n\
                 Sende 'ueberarbeite {}' um ihn zu ueberarbeiten.",
                topic.title,
                catalog.article_url(&topic.slug),
                topic.title,
            ));
        }

        let outcome = self
            .pipeline
            .generate(topic, catalog, "", &format!("Neuer Artikel: {}", topic.title))
            .await?;

        let mut reply = format!(
            "Neuer Artikel erstellt!\n\n\
             Titel: {}\n\
             Slug: {}\n\
             Qualitaet: {}/10\n\
             Bild: {}\n\
             URL: {}\n\n\
             Der Artikel ist live nach dem GitHub Pages Deploy (ca. 1-2 Minuten).",
            outcome.title,
            outcome.slug,
            outcome.score,
            if outcome.image.is_some() { "Ja" } else { "Nein" },
            outcome.url,
        );
        push_publish_warning(&mut reply, &outcome);
        Ok(reply)
    }

    async fn rework(
        &self,
        term: &str,
        body: &str,
        catalog: &Catalog,
        published: &PublishedState,
    ) -> Result<String, Error> {
        let Some(resolution) = resolve(term, &catalog.topics) else {
            info!(term, "No topic matched");
            return Ok(format!("Kein passendes Thema gefunden fuer: '{term}'"));
        };
        let topic = resolution.topic;

        if !published.contains(&topic.slug) {
            return Ok(format!(
                "Artikel '{}' existiert noch nicht.\n\
                 Sende 'neuer artikel ueber {term}' um ihn zu erstellen.",
                topic.title
            ));
        }

        let feedback = if body.trim().is_empty() {
            DEFAULT_REWORK_FEEDBACK
        } else {
            body
        };
        let outcome = self
            .pipeline
            .generate(topic, catalog, feedback, &format!("Ueberarbeitet: {}", topic.title))
            .await?;

        let mut reply = format!(
            "Artikel ueberarbeitet!\n\n\
             Titel: {}\n\
             Qualitaet: {}/10\n\
             URL: {}\n\n\
             Aenderungen sind live nach dem GitHub Pages Deploy (ca. 1-2 Minuten).",
            outcome.title, outcome.score, outcome.url,
        );
        push_publish_warning(&mut reply, &outcome);
        Ok(reply)
    }

    async fn answer(&self, text: &str, catalog: &Catalog) -> Result<String, Error> {
        let system = format!(
            "Du bist der AI-Assistent des {name} Blogs. \
             Beantworte Fragen zum Blog, Tennis-Technik oder zur Verwaltung des Blogs. \
             Blog-URL: {url}",
            name = catalog.site.name,
            url = catalog.site.base_url,
        );
        Ok(self.writer.complete(text, &system).await?)
    }
}

fn push_publish_warning(reply: &mut String, outcome: &GenerationOutcome) {
    if !outcome.published {
        reply.push_str(
            "\n\nHinweis: Die Veroeffentlichung (git push) ist fehlgeschlagen. \
             Der Artikel liegt lokal vor, ist aber noch nicht online.",
        );
    }
}

fn not_found_with_topics(term: &str, catalog: &Catalog) -> String {
    let mut reply = format!("Kein passendes Thema gefunden fuer: '{term}'\n\nVerfuegbare Themen:");
    for topic in &catalog.topics {
        let _ = write!(reply, "\n  - {}", topic.title);
    }
    reply
}

/// Catalog grouped by category in first-seen order, each topic marked
/// `[X]` (published) or `[ ]`.
pub fn topic_list(catalog: &Catalog, published: &PublishedState) -> String {
    let done = published.count_in(catalog);
    let mut out = format!(
        "{} -- Themenliste\nFortschritt: {done}/{} Artikel fertig",
        catalog.site.name,
        catalog.topics.len()
    );
    for (category, topics) in catalog.by_category() {
        let _ = write!(out, "\n\n== {category} ==");
        for topic in topics {
            let mark = if published.contains(&topic.slug) { "[X]" } else { "[ ]" };
            let _ = write!(out, "\n  {mark} {}", topic.title);
        }
    }
    out
}

/// Completion counts overall and per category.
pub fn status_report(catalog: &Catalog, published: &PublishedState) -> String {
    let total = catalog.topics.len();
    let done = published.count_in(catalog);
    let percent = (done * 100).checked_div(total).unwrap_or(0);

    let mut out = format!(
        "{} -- Status\n\nArtikel gesamt: {done}/{total}\nFortschritt: {percent}%\n\nKategorien:",
        catalog.site.name
    );
    for (category, topics) in catalog.by_category() {
        let category_done = topics.iter().filter(|t| published.contains(&t.slug)).count();
        let _ = write!(out, "\n  {category}: {category_done}/{}", topics.len());
    }
    let _ = write!(out, "\n\nURL: {}", catalog.site.base_url);
    out
}

/// Remaining-topics line used in notifications.
pub fn remaining_line(catalog: &Catalog, published: &PublishedState) -> String {
    format!("Noch {} Artikel offen.", catalog.remaining(published).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::catalog;
    use crate::pipeline::PipelineSettings;
    use crate::pipeline::generation::testing::{RecordingPublisher, ScriptedWriter, StubImages, settings};
    use crate::site::Site;

    struct Harness {
        dir: tempfile::TempDir,
        writer: Arc<ScriptedWriter>,
        publisher: Arc<RecordingPublisher>,
        dispatcher: Dispatcher,
    }

    impl Harness {
        fn site(&self) -> Site {
            Site::new(self.dir.path())
        }

        fn publish(&self, slug: &str) {
            std::fs::write(self.site().article_path(slug), "<html>alt</html>").unwrap();
        }

        fn published(&self) -> PublishedState {
            self.site().published().unwrap()
        }
    }

    fn harness_with(scores: &[u8], publisher: RecordingPublisher, pipeline_settings: PipelineSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let site = Site::new(dir.path());
        site.ensure_dirs().unwrap();
        let writer = Arc::new(ScriptedWriter::with_scores(scores));
        let publisher = Arc::new(publisher);
        let pipeline = GenerationPipeline::new(
            writer.clone(),
            Arc::new(StubImages(None)),
            publisher.clone(),
            site,
            pipeline_settings,
        );
        Harness {
            dir,
            writer: writer.clone(),
            publisher,
            dispatcher: Dispatcher::new(pipeline, writer),
        }
    }

    fn harness(scores: &[u8]) -> Harness {
        harness_with(scores, RecordingPublisher::default(), settings())
    }

    // ── Listing ─────────────────────────────────────────────────────

    #[test]
    fn topic_list_groups_in_catalog_order() {
        let catalog = catalog();
        let published = PublishedState::from_slugs(["aufschlag-kick"]);
        let list = topic_list(&catalog, &published);

        assert!(list.starts_with("AI Tennis Lab -- Themenliste\nFortschritt: 1/5 Artikel fertig\n\n== Grundschlaege =="));
        let expected = "== Grundschlaege ==\n  [ ] Vorhand Topspin Technik\n  [ ] Einhaendige Rueckhand\n  \
                        [ ] Split-Step und Beinarbeit\n\n== Aufschlag ==\n  [X] Kick-Aufschlag lernen\n\n\
                        == Netzspiel ==\n  [ ] Volley Grundlagen";
        assert!(list.ends_with(expected), "{list}");
    }

    #[test]
    fn status_counts_per_category() {
        let catalog = catalog();
        let published = PublishedState::from_slugs(["vorhand-topspin-technik", "volley-grundlagen", "gone"]);
        let status = status_report(&catalog, &published);
        assert!(status.contains("Artikel gesamt: 2/5"));
        assert!(status.contains("Fortschritt: 40%"));
        assert!(status.contains("  Grundschlaege: 1/3"));
        assert!(status.contains("  Aufschlag: 0/1"));
        assert!(status.contains("  Netzspiel: 1/1"));
        assert!(status.ends_with("URL: https://lab.example.org"));
    }

    #[test]
    fn status_with_empty_catalog() {
        let mut catalog = catalog();
        catalog.topics.clear();
        let status = status_report(&catalog, &PublishedState::default());
        assert!(status.contains("Artikel gesamt: 0/0"));
        assert!(status.contains("Fortschritt: 0%"));
    }

    // ── GenerateNew ─────────────────────────────────────────────────

    #[tokio::test]
    async fn generate_new_runs_pipeline() {
        let h = harness(&[5, 8]);
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::GenerateNew("volley".into()), "", &catalog, &h.published())
            .await
            .unwrap();

        assert!(reply.starts_with("Neuer Artikel erstellt!"));
        assert!(reply.contains("Slug: volley-grundlagen"));
        assert!(reply.contains("Qualitaet: 8/10"));
        assert!(reply.contains("Bild: Nein"));
        assert!(reply.contains("URL: https://lab.example.org/artikel/volley-grundlagen.html"));
        assert!(!reply.contains("Hinweis"));
        assert_eq!(h.publisher.messages(), vec!["Neuer Artikel: Volley Grundlagen"]);
        assert_eq!(h.writer.draft_prompts().len(), 2);
    }

    #[tokio::test]
    async fn generate_new_on_published_topic_never_regenerates() {
        let h = harness(&[8]);
        h.publish("volley-grundlagen");
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::GenerateNew("volley".into()), "", &catalog, &h.published())
            .await
            .unwrap();

        assert!(reply.starts_with("Artikel existiert bereits: Volley Grundlagen"));
        assert!(reply.contains("https://lab.example.org/artikel/volley-grundlagen.html"));
        assert!(reply.contains("Sende 'ueberarbeite Volley Grundlagen'"));
        assert!(h.writer.prompts().is_empty());
        assert!(h.publisher.messages().is_empty());
        let html = std::fs::read_to_string(h.site().article_path("volley-grundlagen")).unwrap();
        assert_eq!(html, "<html>alt</html>");
    }

    #[tokio::test]
    async fn generate_new_unknown_lists_topics() {
        let h = harness(&[]);
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::GenerateNew("golf".into()), "", &catalog, &h.published())
            .await
            .unwrap();
        assert!(reply.starts_with("Kein passendes Thema gefunden fuer: 'golf'"));
        assert!(reply.contains("\n  - Kick-Aufschlag lernen"));
        assert!(h.writer.prompts().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_still_reports_success() {
        let h = harness_with(&[8], RecordingPublisher::failing(), settings());
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::GenerateNew("aufschlag".into()), "", &catalog, &h.published())
            .await
            .unwrap();
        assert!(reply.starts_with("Neuer Artikel erstellt!"));
        assert!(reply.contains("Hinweis: Die Veroeffentlichung (git push) ist fehlgeschlagen."));
    }

    // ── Rework ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn rework_unpublished_refuses() {
        let h = harness(&[8]);
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::Rework("volley".into()), "kuerzer", &catalog, &h.published())
            .await
            .unwrap();
        assert_eq!(
            reply,
            "Artikel 'Volley Grundlagen' existiert noch nicht.\n\
             Sende 'neuer artikel ueber volley' um ihn zu erstellen."
        );
        assert!(h.writer.prompts().is_empty());
        assert!(!h.site().article_path("volley-grundlagen").exists());
    }

    #[tokio::test]
    async fn rework_uses_body_as_feedback() {
        let h = harness(&[8]);
        h.publish("volley-grundlagen");
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::Rework("volley".into()), "Mehr Uebungen fuer Kinder.", &catalog, &h.published())
            .await
            .unwrap();

        assert!(reply.starts_with("Artikel ueberarbeitet!"));
        assert!(h.writer.draft_prompts()[0].contains("Mehr Uebungen fuer Kinder."));
        assert_eq!(h.publisher.messages(), vec!["Ueberarbeitet: Volley Grundlagen"]);
        let html = std::fs::read_to_string(h.site().article_path("volley-grundlagen")).unwrap();
        assert!(html.contains("Entwurf 1"));
    }

    #[tokio::test]
    async fn rework_without_body_uses_default_feedback() {
        let h = harness(&[8]);
        h.publish("volley-grundlagen");
        let catalog = catalog();
        h.dispatcher
            .dispatch(&Command::Rework("volley".into()), "  ", &catalog, &h.published())
            .await
            .unwrap();
        assert!(h.writer.draft_prompts()[0].contains(DEFAULT_REWORK_FEEDBACK));
    }

    #[tokio::test]
    async fn rework_unknown_topic() {
        let h = harness(&[]);
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::Rework("golf".into()), "", &catalog, &h.published())
            .await
            .unwrap();
        assert_eq!(reply, "Kein passendes Thema gefunden fuer: 'golf'");
    }

    // ── Question ────────────────────────────────────────────────────

    #[tokio::test]
    async fn question_reply_is_verbatim() {
        let h = harness(&[]);
        let catalog = catalog();
        let reply = h
            .dispatcher
            .dispatch(&Command::Question("Wie oft trainieren?".into()), "", &catalog, &h.published())
            .await
            .unwrap();
        assert_eq!(reply, "Antwort");
        assert_eq!(h.writer.prompts(), vec!["Wie oft trainieren?"]);
    }

    #[test]
    fn remaining_line_counts_unpublished() {
        let catalog = catalog();
        let published = PublishedState::from_slugs(["volley-grundlagen"]);
        assert_eq!(remaining_line(&catalog, &published), "Noch 4 Artikel offen.");
    }
}
