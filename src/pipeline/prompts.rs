//! Prompt construction and reply parsing for the generation pipeline.
//!
//! Everything here is pure string work so the formats can be tested without
//! a model. Prompts are German; the site is written for German-speaking coaches.

use serde::{Deserialize, Serialize};

use crate::catalog::Topic;

/// Separator between the article HTML and its metadata JSON.
pub const META_SEPARATOR: &str = "|||META|||";

/// Characters of draft HTML submitted to the quality check.
pub const QUALITY_EXCERPT_CHARS: usize = 3000;

/// Score assumed when the checker's reply carries no readable total.
pub const DEFAULT_SCORE: u8 = 7;

pub const RESEARCH_SYSTEM: &str = "Du bist ein Tennisexperte und Sportwissenschaftler.";

pub const ARTICLE_SYSTEM: &str = "Du bist ein erfahrener Tennisexperte und Sportanalyst. \
     Schreibe fuer Tennistrainer. Nutze korrekte biomechanische Fachbegriffe. \
     Strukturiere mit H2/H3 Ueberschriften. \
     Referenziere DTB- und ITF-Methodik wo passend.";

pub const QUALITY_SYSTEM: &str = "Du bist ein strenger Redakteur fuer Sportfachmedien.";

// ── Prompts ─────────────────────────────────────────────────────────

/// Background-notes prompt. Sent before every draft loop, rework included.
pub fn research_prompt(topic: &Topic) -> String {
    format!(
        "Recherchiere zum Tennisthema: \"{title}\"\n\
         Kategorie: {category}, Niveau: {difficulty}\n\
         \n\
         Liefere kurze, faktenbasierte Notizen zu:\n\
         1. Biomechanische Grundlagen (kinematische Kette, Gelenkwinkel)\n\
         2. DTB/ITF-Methodik und offizielle Empfehlungen\n\
         3. Haeufige Mythen oder Missverstaendnisse\n\
         4. 5 zentrale Fakten die im Artikel vorkommen muessen\n\
         5. Typische Fehlerbilder und deren Korrektur\n\
         \n\
         Antworte kompakt in Stichpunkten, max 300 Woerter.",
        title = topic.title,
        category = topic.category,
        difficulty = topic.difficulty,
    )
}

/// Full-draft prompt conditioned on research notes and the current feedback.
pub fn article_prompt(topic: &Topic, research: &str, feedback: &str) -> String {
    let mut prompt = format!(
        "Schreibe einen ausfuehrlichen Artikel zum Thema: \"{}\"\n\n\
         Kategorie: {}\n\
         Niveau: {}\n\
         Keywords: {}\n",
        topic.title,
        topic.category,
        topic.difficulty,
        topic.keywords.join(", "),
    );

    if !research.trim().is_empty() {
        prompt.push_str("\nRecherche-Ergebnisse (nutze diese Fakten im Artikel):\n");
        prompt.push_str(research.trim());
        prompt.push('\n');
    }
    if !feedback.trim().is_empty() {
        prompt.push_str("\nBitte beruecksichtige folgendes Feedback zur Verbesserung:\n");
        prompt.push_str(feedback.trim());
        prompt.push('\n');
    }

    prompt.push_str(
        "\nAnforderungen:\n\
         - 1200-1500 Woerter\n\
         - Verwende HTML-Tags: <h2>, <h3>, <p>, <ul>, <li>, <ol>, <strong>, <em>\n\
         - Beginne NICHT mit <h1> (wird vom Template gesetzt)\n\
         - Struktur: Einfuehrung, Technikbeschreibung (biomechanisch), Fehlerbilder, \
         Uebungen (mit Wiederholungen), Sicherheitstipps\n\
         - Verwende biomechanische Fachbegriffe (kinematische Kette, Pronation, etc.)\n\
         - Fuer Uebungen: konkrete Wiederholungszahlen und Progressionen angeben\n\
         \n\
         Antworte NUR mit dem HTML-Inhalt, kein Markdown, keine Erklaerungen.\n\
         \n\
         Gib am Ende in einer separaten Zeile folgendes JSON zurueck (nach dem HTML):\n",
    );
    prompt.push_str(META_SEPARATOR);
    prompt.push_str(
        "\n{\"meta_description\": \"kurze Beschreibung unter 155 Zeichen\", \
         \"howto_steps\": [{\"name\": \"Schritt 1 Titel\", \"text\": \"Beschreibung\"}, \
         {\"name\": \"Schritt 2 Titel\", \"text\": \"Beschreibung\"}, \
         {\"name\": \"Schritt 3 Titel\", \"text\": \"Beschreibung\"}]}",
    );
    prompt
}

/// Independent scoring prompt. Only an excerpt of the draft is sent.
pub fn quality_prompt(topic: &Topic, content_html: &str) -> String {
    let excerpt: String = content_html.chars().take(QUALITY_EXCERPT_CHARS).collect();
    format!(
        "Bewerte folgenden Tennis-Fachartikel zum Thema \"{}\".\n\
         \n\
         Bewerte auf einer Skala von 1-10 in diesen Kategorien:\n\
         - Fachliche Korrektheit (biomechanische Begriffe, DTB/ITF-konform)\n\
         - Lesbarkeit (Struktur, Verstaendlichkeit fuer Trainer)\n\
         - Vollstaendigkeit (Technik, Fehlerbilder, Uebungen, Sicherheit)\n\
         - E-E-A-T (Expertise, Experience, Authority, Trust)\n\
         \n\
         Artikel-HTML:\n\
         {excerpt}\n\
         \n\
         Antworte NUR in diesem Format:\n\
         KORREKTHEIT: <Zahl>\n\
         LESBARKEIT: <Zahl>\n\
         VOLLSTAENDIGKEIT: <Zahl>\n\
         EEAT: <Zahl>\n\
         GESAMT: <Zahl>\n\
         FEEDBACK: <1-2 Saetze konkretes Verbesserungsfeedback>",
        topic.title
    )
}

// ── Draft parsing ───────────────────────────────────────────────────

/// One step of the article's how-to structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HowToStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
}

/// A parsed draft ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub content_html: String,
    pub meta_description: String,
    pub howto_steps: Vec<HowToStep>,
}

#[derive(Debug, Deserialize)]
struct DraftMeta {
    #[serde(default)]
    meta_description: Option<String>,
    #[serde(default)]
    howto_steps: Vec<HowToStep>,
}

/// Split a raw completion into HTML and metadata.
///
/// Missing or unreadable metadata falls back to the topic title as the
/// description and no how-to steps.
pub fn parse_draft(raw: &str, topic: &Topic) -> Draft {
    let (content, meta_raw) = match raw.split_once(META_SEPARATOR) {
        Some((content, meta)) => (content, Some(meta)),
        None => (raw, None),
    };

    let meta = meta_raw.and_then(|m| match serde_json::from_str::<DraftMeta>(m.trim()) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::debug!(slug = %topic.slug, error = %e, "Draft metadata unreadable");
            None
        }
    });

    let (meta_description, howto_steps) = match meta {
        Some(meta) => (
            meta.meta_description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| topic.title.clone()),
            meta.howto_steps,
        ),
        None => (topic.title.clone(), Vec::new()),
    };

    Draft {
        content_html: strip_code_fences(content),
        meta_description,
        howto_steps,
    }
}

/// Remove a surrounding markdown code fence (```html … ```).
pub fn strip_code_fences(content: &str) -> String {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```html") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

// ── Quality parsing ─────────────────────────────────────────────────

/// The checker's verdict on one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityVerdict {
    /// Overall score, 1–10.
    pub score: u8,
    /// Critique used as feedback for the next attempt.
    pub feedback: String,
}

impl QualityVerdict {
    pub fn passed(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}

/// Read `GESAMT:` and `FEEDBACK:` lines from the checker's reply.
pub fn parse_quality(raw: &str) -> QualityVerdict {
    let mut score = DEFAULT_SCORE;
    let mut feedback = String::new();

    for line in raw.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("GESAMT:") {
            let number = rest.trim().split('/').next().unwrap_or_default().trim();
            if let Ok(n) = number.parse::<i64>() {
                score = n.clamp(1, 10) as u8;
            }
        } else if let Some(rest) = line.strip_prefix("FEEDBACK:") {
            feedback = rest.trim().to_string();
        }
    }

    QualityVerdict { score, feedback }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::topic;

    fn volley() -> Topic {
        topic("volley-grundlagen", "Volley Grundlagen", "Netzspiel", &["volley", "netz"])
    }

    // ── Prompts ─────────────────────────────────────────────────────

    #[test]
    fn research_prompt_names_topic() {
        let prompt = research_prompt(&volley());
        assert!(prompt.contains("\"Volley Grundlagen\""));
        assert!(prompt.contains("Kategorie: Netzspiel, Niveau: Mittel"));
    }

    #[test]
    fn article_prompt_without_feedback_has_no_feedback_block() {
        let prompt = article_prompt(&volley(), "Notizen", "");
        assert!(prompt.contains("Keywords: volley, netz"));
        assert!(prompt.contains("Recherche-Ergebnisse"));
        assert!(!prompt.contains("Feedback zur Verbesserung"));
        assert!(prompt.contains(META_SEPARATOR));
    }

    #[test]
    fn article_prompt_carries_feedback() {
        let prompt = article_prompt(&volley(), "", "Mehr Uebungen.");
        assert!(!prompt.contains("Recherche-Ergebnisse"));
        assert!(prompt.contains("Feedback zur Verbesserung:\nMehr Uebungen."));
    }

    #[test]
    fn quality_prompt_truncates_draft() {
        let long = "a".repeat(QUALITY_EXCERPT_CHARS + 500);
        let prompt = quality_prompt(&volley(), &long);
        assert!(prompt.contains(&"a".repeat(QUALITY_EXCERPT_CHARS)));
        assert!(!prompt.contains(&"a".repeat(QUALITY_EXCERPT_CHARS + 1)));
    }

    // ── Draft parsing ───────────────────────────────────────────────

    #[test]
    fn parse_draft_with_meta() {
        let raw = "<h2>Einleitung</h2><p>Text</p>\n|||META|||\n\
                   {\"meta_description\": \"Volley lernen\", \
                    \"howto_steps\": [{\"name\": \"Griff\", \"text\": \"Kontinentalgriff\"}]}";
        let draft = parse_draft(raw, &volley());
        assert_eq!(draft.content_html, "<h2>Einleitung</h2><p>Text</p>");
        assert_eq!(draft.meta_description, "Volley lernen");
        assert_eq!(draft.howto_steps.len(), 1);
        assert_eq!(draft.howto_steps[0].name, "Griff");
    }

    #[test]
    fn parse_draft_without_separator_falls_back_to_title() {
        let draft = parse_draft("<p>Nur Text</p>", &volley());
        assert_eq!(draft.content_html, "<p>Nur Text</p>");
        assert_eq!(draft.meta_description, "Volley Grundlagen");
        assert!(draft.howto_steps.is_empty());
    }

    #[test]
    fn parse_draft_with_broken_json_falls_back() {
        let draft = parse_draft("<p>x</p>|||META|||{not json", &volley());
        assert_eq!(draft.meta_description, "Volley Grundlagen");
        assert!(draft.howto_steps.is_empty());
    }

    #[test]
    fn parse_draft_strips_fences() {
        let draft = parse_draft("```html\n<p>x</p>\n```", &volley());
        assert_eq!(draft.content_html, "<p>x</p>");
    }

    #[test]
    fn strip_plain_fence() {
        assert_eq!(strip_code_fences("```\n<p>y</p>```"), "<p>y</p>");
        assert_eq!(strip_code_fences("<p>z</p>"), "<p>z</p>");
    }

    // ── Quality parsing ─────────────────────────────────────────────

    #[test]
    fn parse_quality_reads_total_and_feedback() {
        let raw = "KORREKTHEIT: 8\nLESBARKEIT: 7\nVOLLSTAENDIGKEIT: 6\nEEAT: 7\n\
                   GESAMT: 6\nFEEDBACK: Mehr konkrete Uebungen.";
        let verdict = parse_quality(raw);
        assert_eq!(verdict.score, 6);
        assert_eq!(verdict.feedback, "Mehr konkrete Uebungen.");
        assert!(!verdict.passed(7));
    }

    #[test]
    fn parse_quality_tolerates_out_of_ten() {
        assert_eq!(parse_quality("GESAMT: 8/10").score, 8);
        assert_eq!(parse_quality("GESAMT: 9 / 10").score, 9);
    }

    #[test]
    fn parse_quality_defaults_when_unreadable() {
        let verdict = parse_quality("Sieht gut aus.");
        assert_eq!(verdict.score, DEFAULT_SCORE);
        assert!(verdict.feedback.is_empty());
        assert!(verdict.passed(7));
    }

    #[test]
    fn parse_quality_clamps() {
        assert_eq!(parse_quality("GESAMT: 42").score, 10);
        assert_eq!(parse_quality("GESAMT: 0").score, 1);
    }
}
