use std::collections::VecDeque;

/// Maximum number of exchanges kept for a session.
pub const HISTORY_CAP: usize = 6;

/// One completed turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Bounded FIFO of past exchanges, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    exchanges: VecDeque<Exchange>,
    cap: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_cap(HISTORY_CAP)
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append an exchange, evicting the oldest ones past the cap.
    pub fn push(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.exchanges.push_back(Exchange {
            user: user.into(),
            assistant: assistant.into(),
        });
        while self.exchanges.len() > self.cap {
            self.exchanges.pop_front();
        }
    }

    /// The `n` most recent exchanges, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Exchange> {
        let skip = self.exchanges.len().saturating_sub(n);
        self.exchanges.iter().skip(skip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}
