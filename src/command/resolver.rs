//! Fuzzy topic resolution.
//!
//! Deliberately a bag-of-words overlap score so results are reproducible and
//! explainable: for every search word (≥ 3 chars) a topic earns 2 points if the
//! word occurs anywhere in its title/slug/keyword text, otherwise 1 point if it
//! overlaps a single word of that text. The strictly highest score wins; ties
//! keep catalog order. A zero score is no match.

use crate::catalog::Topic;

/// Search words shorter than this are ignored.
const MIN_WORD_LEN: usize = 3;

const FULL_MATCH: u32 = 2;
const PARTIAL_MATCH: u32 = 1;

/// A resolved topic together with the score that selected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub topic: &'a Topic,
    pub score: u32,
}

/// Lower-cased distinct search words of at least [`MIN_WORD_LEN`] characters.
pub fn tokenize(search_term: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in search_term.to_lowercase().split_whitespace() {
        if word.chars().count() < MIN_WORD_LEN {
            continue;
        }
        if !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

/// The combined text a topic is matched against.
fn surface(topic: &Topic) -> String {
    let slug = topic.slug.replace(['-', '_'], " ");
    let keywords = topic.keywords.join(" ");
    format!("{} {} {}", topic.title, slug, keywords).to_lowercase()
}

/// Score one topic against pre-tokenized search words.
pub fn score_topic(words: &[String], topic: &Topic) -> u32 {
    let text = surface(topic);
    words
        .iter()
        .map(|word| {
            if text.contains(word.as_str()) {
                FULL_MATCH
            } else if text
                .split_whitespace()
                .any(|w| w.contains(word.as_str()) || word.contains(w))
            {
                PARTIAL_MATCH
            } else {
                0
            }
        })
        .sum()
}

/// Resolve a free-text search term to the best-scoring topic.
pub fn resolve<'a>(search_term: &str, topics: &'a [Topic]) -> Option<Resolution<'a>> {
    let words = tokenize(search_term);
    let mut best: Option<Resolution<'a>> = None;

    for topic in topics {
        let score = score_topic(&words, topic);
        if score > best.map_or(0, |b| b.score) {
            best = Some(Resolution { topic, score });
        }
    }

    match best {
        Some(r) => tracing::debug!(term = search_term, slug = %r.topic.slug, score = r.score, "Topic resolved"),
        None => tracing::debug!(term = search_term, "No topic matched"),
    }
    best
}
