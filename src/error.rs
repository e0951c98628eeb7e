//! Recoverable failures of a chat turn.
//!
//! None of these end a session: lookups degrade to "no result", generation
//! failures to a clarification sentence. Only initialization errors are fatal,
//! and those travel as `anyhow::Error` out of `main`.

use std::time::Duration;

/// A search oracle could not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("search provider `{0}` is not configured")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0} from search provider")]
    Status(reqwest::StatusCode),

    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// The generative oracle failed to produce text.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("failed to create the llama context: {0}")]
    Context(String),

    #[error("failed to tokenize the prompt: {0}")]
    Tokenize(String),

    #[error("llama_decode() failed: {0}")]
    Decode(String),

    #[error("generation exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

/// Failure of the hosted completion API behind the `/chat` relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("upstream response has no message content")]
    EmptyChoice,
}
