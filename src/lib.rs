//! Kelsie: a small conversational assistant.
//!
//! The chat loop answers each turn from canned direct answers, a web lookup
//! or a local llama.cpp model, in that order. A separate relay forwards
//! messages to a hosted completion API.

pub mod args_handler;
pub mod clock;
pub mod context;
pub mod error;
pub mod history;
pub mod intent;
pub mod llm;
pub mod lookup;
pub mod postprocess;
pub mod relay;
pub mod session;
