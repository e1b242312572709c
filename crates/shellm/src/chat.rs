//! Token-budgeted chat history for follow-up mode.
//!
//! [`ChatSession`] keeps an ordered message history under an approximate
//! token budget. Two invariants hold after every mutation:
//!
//! - `history[0]` is always the system message and is never evicted.
//! - the total token estimate is within the budget, except in the
//!   irreducible case where a single newest message alone exceeds it —
//!   then the history is just {system, newest}. Starving older context is
//!   preferred to dropping the newest turn.
//!
//! Eviction is whole-message: the shortest prefix of non-system messages
//! whose combined estimate covers the overflow is removed. This can free up
//! to one message more than strictly required; that imprecision is accepted
//! in exchange for never splitting a message.

use crate::Message;

/// Default context window budget in tokens, used when the backend doesn't
/// report a model-specific size.
pub const DEFAULT_CONTEXT_TOKENS: usize = 4096;

/// Approximate token count: 4 characters per token. Deliberately not tied
/// to any model's tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Ordered chat history with a running token estimate.
#[derive(Debug)]
pub struct ChatSession {
    history: Vec<Message>,
    max_tokens: usize,
    current_tokens: usize,
}

impl ChatSession {
    pub fn new(system_prompt: &str, max_tokens: usize) -> Self {
        let system = Message::system(system_prompt);
        let current_tokens = estimate_tokens(&system.content);
        Self {
            history: vec![system],
            max_tokens,
            current_tokens,
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::user(content.into()));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content.into()));
    }

    /// Record an executed command and its output as a user turn, so later
    /// generations can build on what actually happened.
    pub fn add_command_execution(&mut self, command: &str, output: &str) {
        self.push(Message::user(format!(
            "I executed the command: {command}\n\nOutput:\n{output}"
        )));
    }

    /// Record a declined command as a user turn asking for an alternative.
    pub fn add_declined_command(&mut self, command: &str) {
        self.push(Message::user(format!(
            "I declined to execute the command: {command}\nPlease suggest a different command."
        )));
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Current usage as a percentage of the budget, for a progress readout.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        (self.current_tokens as f64 / self.max_tokens as f64) * 100.0
    }

    /// One-line usage bar for the terminal.
    pub fn usage_bar(&self) -> String {
        const BAR_LENGTH: usize = 30;
        let pct = self.usage_percentage().min(100.0);
        let filled = (BAR_LENGTH as f64 * pct / 100.0) as usize;
        let bar: String = std::iter::repeat_n('█', filled)
            .chain(std::iter::repeat_n('░', BAR_LENGTH - filled))
            .collect();
        format!("Context window: [{bar}] {:.1}%", self.usage_percentage())
    }

    /// Append a message, evicting the oldest non-system messages first if
    /// the budget would overflow. Never rejects the message itself.
    fn push(&mut self, message: Message) {
        let new_tokens = estimate_tokens(&message.content);
        if self.current_tokens + new_tokens > self.max_tokens {
            let overflow = self.current_tokens + new_tokens - self.max_tokens;
            self.evict(overflow);
        }
        self.current_tokens += new_tokens;
        self.history.push(message);
    }

    /// Remove the shortest prefix of messages after index 0 whose estimates
    /// sum to at least `overflow` tokens.
    fn evict(&mut self, overflow: usize) {
        let mut freed = 0;
        let mut remove = 0;
        for message in self.history.iter().skip(1) {
            freed += estimate_tokens(&message.content);
            remove += 1;
            if freed >= overflow {
                break;
            }
        }
        if remove > 0 {
            self.history.drain(1..=remove);
            self.current_tokens = self.current_tokens.saturating_sub(freed);
        }
    }
}
