//! One conversation: turn handling, reply selection and the terminal loop.
//!
//! A turn is answered by the first source that produces something: canned
//! direct answers, then a web lookup (factual questions only), then the
//! generative model. Nothing that goes wrong inside a turn ends the session.

use std::io::{self, BufRead, Write};

use log::{debug, warn};

use crate::clock::Clock;
use crate::context::build_prompt;
use crate::history::ConversationHistory;
use crate::intent::{answer_for, classify, DirectIntent, Intent};
use crate::llm::Generator;
use crate::lookup::{format_lookup_reply, KnowledgeLookup};
use crate::postprocess::{self, CLARIFICATION};

pub const GREETING: &str = "Kelsie is ready. Type 'quit' to exit.";
pub const FAREWELL: &str = "Goodbye! Talk to you soon.";
pub const EXIT_KEYWORDS: &[&str] = &["quit", "exit", "bye"];

/// Attempts per turn when the model keeps returning blank text.
pub const MAX_GENERATION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingInput,
    Responding,
    Terminated,
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Direct(DirectIntent),
    Lookup,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

/// Result of feeding one line of input to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, nothing to answer.
    Reprompt,
    Reply(Reply),
    Farewell(&'static str),
}

pub fn is_exit_keyword(input: &str) -> bool {
    let input = input.trim();
    EXIT_KEYWORDS.iter().any(|k| input.eq_ignore_ascii_case(k))
}

pub struct Session<G, C> {
    generator: G,
    lookup: Option<KnowledgeLookup>,
    clock: C,
    history: ConversationHistory,
    state: SessionState,
}

impl<G: Generator, C: Clock> Session<G, C> {
    /// A session with no web lookups when `lookup` is `None`.
    pub fn new(generator: G, lookup: Option<KnowledgeLookup>, clock: C) -> Self {
        Self {
            generator,
            lookup,
            clock,
            history: ConversationHistory::new(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn start(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::AwaitingInput;
        }
    }

    /// End the conversation and drop its history.
    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.history.clear();
    }

    /// Process one line of user input.
    pub fn handle(&mut self, input: &str) -> TurnOutcome {
        match self.state {
            SessionState::Terminated => return TurnOutcome::Farewell(FAREWELL),
            SessionState::Idle => self.start(),
            SessionState::AwaitingInput | SessionState::Responding => {}
        }

        let utterance = input.trim();
        if utterance.is_empty() {
            return TurnOutcome::Reprompt;
        }
        if is_exit_keyword(utterance) {
            self.terminate();
            return TurnOutcome::Farewell(FAREWELL);
        }

        self.state = SessionState::Responding;
        let reply = self.respond(utterance);
        self.history.push(utterance, reply.text.as_str());
        self.state = SessionState::AwaitingInput;

        TurnOutcome::Reply(reply)
    }

    fn respond(&self, utterance: &str) -> Reply {
        let intent = classify(utterance);
        debug!("classified turn as {intent:?}");

        match intent {
            Intent::DirectAnswer(direct) => Reply {
                text: answer_for(direct, self.clock.now()),
                source: ReplySource::Direct(direct),
            },
            Intent::FactualLookup => match self.lookup.as_ref().and_then(|l| l.lookup(utterance)) {
                Some(answer) => Reply {
                    text: format_lookup_reply(&answer),
                    source: ReplySource::Lookup,
                },
                None => self.generated(utterance),
            },
            Intent::Generative => self.generated(utterance),
        }
    }

    fn generated(&self, utterance: &str) -> Reply {
        Reply {
            text: self.generate_reply(utterance),
            source: ReplySource::Generated,
        }
    }

    fn generate_reply(&self, utterance: &str) -> String {
        let prompt = build_prompt(&self.history, utterance, self.clock.now());

        let mut raw = String::new();
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            match self.generator.generate(&prompt) {
                Ok(text) if text.trim().is_empty() => {
                    debug!("blank generation (attempt {attempt}/{MAX_GENERATION_ATTEMPTS})");
                }
                Ok(text) => {
                    raw = text;
                    break;
                }
                Err(e) => {
                    warn!("generation failed: {e}");
                    return CLARIFICATION.to_string();
                }
            }
        }

        let cleaned = postprocess::clean(&raw);
        if let Some(recovery) = cleaned.recovery {
            debug!("replaced model output: {recovery:?}");
        }
        cleaned.text
    }

    /// Drive the conversation over a line-oriented terminal until exit or EOF.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> io::Result<()> {
        writeln!(output, "{GREETING}")?;
        self.start();

        let mut line = String::new();
        loop {
            write!(output, "\nYou: ")?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                self.terminate();
                writeln!(output, "\n{FAREWELL}")?;
                break;
            }

            match self.handle(&line) {
                TurnOutcome::Reprompt => continue,
                TurnOutcome::Reply(reply) => writeln!(output, "Assistant: {}", reply.text)?,
                TurnOutcome::Farewell(farewell) => {
                    writeln!(output, "{farewell}")?;
                    break;
                }
            }
        }

        output.flush()
    }
}
