//! Cleanup of raw model output before it is shown to the user.

/// Substituted when the output trips the content filter.
pub const DEFLECTION: &str =
    "I'm here to help with questions and conversation. What would you like to talk about?";

/// Substituted when there is nothing usable to say.
pub const CLARIFICATION: &str =
    "I'm not sure I understood that. Could you rephrase your question?";

/// Markers of the model starting a new speaker turn on its own.
const TURN_MARKERS: &[&str] = &["user:", "human:", "assistant:", "kelsie:"];

const DENYLIST: &[&str] = &[
    "i love you",
    "love you too",
    "kiss me",
    "marry me",
    "sexy",
    "my darling",
    "sweetheart",
    "babe",
    "be my girlfriend",
    "be my boyfriend",
];

const INTERROGATIVES: &[&str] = &["who", "what", "when", "where", "why", "how"];

/// A substitution made while cleaning a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    ContentPolicyViolation,
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleaned {
    pub text: String,
    pub recovery: Option<Recovery>,
}

/// Run the full cleanup pipeline over raw model output.
pub fn clean(raw: &str) -> Cleaned {
    let text = strip_turn_markers(raw);

    let (text, recovery) = if violates_content_policy(text) {
        (DEFLECTION.to_string(), Some(Recovery::ContentPolicyViolation))
    } else if text.chars().count() < 2 {
        (CLARIFICATION.to_string(), Some(Recovery::EmptyOutput))
    } else {
        (text.to_string(), None)
    };

    Cleaned {
        text: normalize(&text),
        recovery,
    }
}

/// Cut the text at the earliest speaker marker and trim it.
pub fn strip_turn_markers(raw: &str) -> &str {
    // Lowercasing can change byte lengths outside ASCII, so only ASCII is folded.
    let lowered = raw.to_ascii_lowercase();
    let cut = TURN_MARKERS
        .iter()
        .filter_map(|marker| lowered.find(marker))
        .min()
        .unwrap_or(raw.len());
    raw[..cut].trim()
}

pub fn violates_content_policy(text: &str) -> bool {
    let lowered = text.to_lowercase();
    DENYLIST.iter().any(|phrase| lowered.contains(phrase))
}

/// Capitalize and terminate a sentence. Idempotent.
pub fn normalize(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let mut out: String = match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        Some(_) => text.to_string(),
        None => return String::new(),
    };

    if !ends_with_terminal(&out) {
        out.push(if is_question(&out) { '?' } else { '.' });
    }
    out
}

pub fn ends_with_terminal(text: &str) -> bool {
    text.ends_with(['.', '!', '?'])
}

fn is_question(text: &str) -> bool {
    // contractions split too, so "how's" counts as "how"
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| INTERROGATIVES.contains(&word.to_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_at_first_marker() {
        assert_eq!(strip_turn_markers("Sure thing. User: and then"), "Sure thing.");
        assert_eq!(
            strip_turn_markers("Fine, thanks!\nhuman: hi\nAssistant: hello"),
            "Fine, thanks!"
        );
        assert_eq!(strip_turn_markers("KELSIE: hello"), "");
        assert_eq!(strip_turn_markers("  no markers here  "), "no markers here");
    }

    #[test]
    fn markers_are_cut_before_filtering() {
        let cleaned = clean("I love you User: more text");
        assert_eq!(cleaned.text, DEFLECTION);
        assert_eq!(cleaned.recovery, Some(Recovery::ContentPolicyViolation));
    }

    #[test]
    fn denylisted_phrase_anywhere_is_deflected() {
        for raw in [
            "well, SWEETHEART, that is a great question",
            "you are so sexy",
            "Would you marry me?",
        ] {
            assert_eq!(clean(raw).text, DEFLECTION, "raw: {raw}");
        }
    }

    #[test]
    fn degenerate_output_asks_for_clarification() {
        for raw in ["", "   ", "k", "User: hello", "a Assistant: b"] {
            let cleaned = clean(raw);
            assert_eq!(cleaned.text, CLARIFICATION, "raw: {raw:?}");
            assert_eq!(cleaned.recovery, Some(Recovery::EmptyOutput));
        }
    }

    #[test]
    fn capitalizes_and_punctuates() {
        assert_eq!(normalize("paris is lovely"), "Paris is lovely.");
        assert_eq!(normalize("how can I help"), "How can I help?");
        assert_eq!(normalize("Tell me what you need"), "Tell me what you need?");
        assert_eq!(normalize("whatever works"), "Whatever works.");
        assert_eq!(normalize("wow!"), "Wow!");
        assert_eq!(normalize("42 is the answer"), "42 is the answer.");
    }

    #[test]
    fn contractions_of_interrogatives_are_questions() {
        assert_eq!(normalize("how's it going"), "How's it going?");
        assert_eq!(normalize("what's new"), "What's new?");
        assert_eq!(normalize("where're you headed"), "Where're you headed?");
        assert_eq!(normalize("that's fine"), "That's fine.");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["hello there", "why not", "done.", "é bien", "ok?!", "where is it"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn clean_passes_ordinary_text() {
        let cleaned = clean(" the weather looks nice today\nUser: thanks");
        assert_eq!(cleaned.text, "The weather looks nice today.");
        assert_eq!(cleaned.recovery, None);
    }
}
