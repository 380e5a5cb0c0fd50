//! Free-text command classification.
//!
//! Classification is an ordered list of rules evaluated first-match-wins over
//! the lower-cased `subject + " " + body`. The order is the priority: a topic
//! list request beats a status request, which beats article requests.
//! Nothing is ever rejected; unmatched text becomes a [`Command::Question`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// A typed command parsed from one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListTopics,
    Status,
    GenerateNew(String),
    Rework(String),
    Question(String),
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::ListTopics => "list_topics",
            Command::Status => "status",
            Command::GenerateNew(_) => "generate_new",
            Command::Rework(_) => "rework",
            Command::Question(_) => "question",
        }
    }
}

/// Words that request the topic list.
const LIST_SYNONYMS: &[&str] = &["themenliste", "topics", "themen"];

/// A status request must be shorter than this many whitespace-separated tokens.
const STATUS_MAX_TOKENS: usize = 10;

static NEW_ARTICLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"neuer?\s+artikel\s+(?:über|ueber|uber|zum thema|zu)\s+(.+)",
        r"schreib\w*\s+(?:einen?\s+)?artikel\s+(?:über|ueber|uber|zum thema|zu)\s+(.+)",
        r"new\s+article\s+(?:about|on)\s+(.+)",
        r"write\s+(?:an?\s+)?(?:new\s+)?article\s+(?:about|on)\s+(.+)",
    ])
});

static REWORK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?:überarbeite|ueberarbeite|uberarbeite)n?\s+(.+)",
        r"(?:verbessere|aktualisiere)n?\s+(.+)",
        r"(?:rework|improve|update)\s+(.+)",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("command pattern is a valid regex"))
        .collect()
}

/// The lower-cased text a rule sees plus the original pieces for fallbacks.
struct Input<'a> {
    text: String,
    subject: &'a str,
    body: &'a str,
}

/// One classification rule: returns a command when it matches.
struct Rule {
    name: &'static str,
    apply: fn(&Input<'_>) -> Option<Command>,
}

/// Ordered rule table. Position encodes priority.
const RULES: &[Rule] = &[
    Rule {
        name: "list",
        apply: list_rule,
    },
    Rule {
        name: "status",
        apply: status_rule,
    },
    Rule {
        name: "new_article",
        apply: new_article_rule,
    },
    Rule {
        name: "rework",
        apply: rework_rule,
    },
];

fn list_rule(input: &Input<'_>) -> Option<Command> {
    LIST_SYNONYMS
        .iter()
        .any(|s| input.text.contains(s))
        .then_some(Command::ListTopics)
}

fn status_rule(input: &Input<'_>) -> Option<Command> {
    (input.text.contains("status") && input.text.split_whitespace().count() < STATUS_MAX_TOKENS)
        .then_some(Command::Status)
}

fn new_article_rule(input: &Input<'_>) -> Option<Command> {
    first_capture(&NEW_ARTICLE_PATTERNS, &input.text).map(Command::GenerateNew)
}

fn rework_rule(input: &Input<'_>) -> Option<Command> {
    first_capture(&REWORK_PATTERNS, &input.text).map(Command::Rework)
}

/// Search term from the first matching pattern, trailing punctuation removed.
fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let term = caps.get(1)?.as_str().trim();
        let term = term.trim_end_matches(['.', '!', '?', ',', ';', ':']).trim_end();
        (!term.is_empty()).then(|| term.to_string())
    })
}

fn question_text(subject: &str, body: &str) -> String {
    if body.is_empty() {
        subject.to_string()
    } else if subject.is_empty() {
        body.to_string()
    } else {
        format!("{subject}\n{body}")
    }
}

/// Classify a message into a [`Command`].
pub fn parse(subject: &str, body: &str) -> Command {
    let input = Input {
        text: format!("{subject} {body}").to_lowercase(),
        subject,
        body,
    };

    for rule in RULES {
        if let Some(command) = (rule.apply)(&input) {
            debug!(rule = rule.name, command = command.label(), "Command rule matched");
            return command;
        }
    }

    Command::Question(question_text(input.subject, input.body))
}
