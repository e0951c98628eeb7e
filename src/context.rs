use chrono::NaiveDateTime;

use crate::history::ConversationHistory;

/// Number of past exchanges rendered into a prompt.
pub const CONTEXT_TURNS: usize = 4;

pub const SYSTEM_PREAMBLE: &str = "You are Kelsie, a friendly and helpful AI assistant. \
You answer in one or two short sentences, stay on topic, and say so when you do not know something.";

/// Render the generation prompt for `utterance`.
pub fn build_prompt(history: &ConversationHistory, utterance: &str, now: NaiveDateTime) -> String {
    let mut prompt = format!(
        "{SYSTEM_PREAMBLE}\nCurrent date: {}\nCurrent time: {}\n\n",
        now.format("%Y-%m-%d"),
        now.format("%H:%M"),
    );

    for exchange in history.recent(CONTEXT_TURNS) {
        prompt.push_str(&format!(
            "User: {}\nAssistant: {}\n",
            exchange.user, exchange.assistant
        ));
    }

    prompt.push_str(&format!("User: {}\nAssistant:", utterance.trim()));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(8, 7, 0))
            .unwrap()
    }

    #[test]
    fn empty_history_prompt() {
        let prompt = build_prompt(&ConversationHistory::new(), "tell me a joke ", now());
        assert!(prompt.starts_with(SYSTEM_PREAMBLE));
        assert!(prompt.contains("Current date: 2026-10-19\nCurrent time: 08:07\n"));
        assert!(prompt.ends_with("\n\nUser: tell me a joke\nAssistant:"));
    }

    #[test]
    fn renders_only_last_four_exchanges() {
        let mut history = ConversationHistory::new();
        for i in 0..6 {
            history.push(format!("question {i}"), format!("answer {i}"));
        }
        let prompt = build_prompt(&history, "next", now());

        assert!(!prompt.contains("question 0"));
        assert!(!prompt.contains("question 1"));
        assert!(prompt.contains("User: question 2\nAssistant: answer 2\nUser: question 3"));
        assert!(prompt.contains("User: question 5\nAssistant: answer 5\nUser: next\nAssistant:"));
    }
}
