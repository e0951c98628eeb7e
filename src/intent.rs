//! Keyword intent classification and canned direct answers.
//!
//! Direct answers are an ordered rule table: the first rule whose phrases
//! occur in the lowercased utterance wins, so the order of [`DIRECT_RULES`]
//! is the priority order.

use chrono::NaiveDateTime;

/// Phrases that mark an utterance as a factual question worth a web lookup.
pub const FACTUAL_PHRASES: &[&str] = &[
    "who is",
    "what is",
    "when was",
    "where is",
    "president of",
    "prime minister",
    "capital of",
    "population of",
    "weather in",
    "news about",
];

/// Intents answered without the model or a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectIntent {
    WellBeing,
    Date,
    Time,
    Identity,
}

/// How a turn should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    DirectAnswer(DirectIntent),
    FactualLookup,
    Generative,
}

struct DirectRule {
    intent: DirectIntent,
    phrases: &'static [&'static str],
    answer: fn(NaiveDateTime) -> String,
}

impl DirectRule {
    fn matches(&self, lowered: &str) -> bool {
        self.phrases.iter().any(|p| lowered.contains(p))
    }
}

const DIRECT_RULES: [DirectRule; 4] = [
    DirectRule {
        intent: DirectIntent::WellBeing,
        phrases: &["how are you", "how're you", "how are u", "how do you do"],
        answer: |_| "I'm doing well, thanks for asking! How can I help you today?".to_string(),
    },
    DirectRule {
        intent: DirectIntent::Date,
        phrases: &[
            "what's the date",
            "what is the date",
            "today's date",
            "what day is it",
            "what is today",
            "the date today",
        ],
        answer: |now| format!("Today is {}.", now.format("%A, %B %-d, %Y")),
    },
    DirectRule {
        intent: DirectIntent::Time,
        phrases: &["what time", "current time", "time is it", "the time now"],
        answer: |now| format!("It's {}.", now.format("%-I:%M %p")),
    },
    DirectRule {
        intent: DirectIntent::Identity,
        phrases: &["who are you", "what are you", "your name"],
        answer: |_| {
            "I'm Kelsie, an AI assistant. I can chat, answer questions, and look things up for you."
                .to_string()
        },
    },
];

/// The canned answer for `intent` at `now`.
pub fn answer_for(intent: DirectIntent, now: NaiveDateTime) -> String {
    DIRECT_RULES
        .iter()
        .find(|rule| rule.intent == intent)
        .map(|rule| (rule.answer)(now))
        .unwrap_or_default()
}

pub fn is_factual(utterance: &str) -> bool {
    let lowered = utterance.to_lowercase();
    FACTUAL_PHRASES.iter().any(|p| lowered.contains(p))
}

/// Classify an utterance. Direct answers take precedence over lookups.
pub fn classify(utterance: &str) -> Intent {
    let lowered = utterance.to_lowercase();
    if let Some(rule) = DIRECT_RULES.iter().find(|rule| rule.matches(&lowered)) {
        Intent::DirectAnswer(rule.intent)
    } else if is_factual(&lowered) {
        Intent::FactualLookup
    } else {
        Intent::Generative
    }
}
