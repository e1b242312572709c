//! Natural-language shell command assistant.
//!
//! `shellm` turns a plain-English request into a shell command via a remote
//! chat-completions backend, then walks the user through a confirm / edit /
//! explain / regenerate / execute loop, with an automatic fix cycle when an
//! executed command fails.
//!
//! # Where to find things
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`Session`](session::Session) lifecycle controller: generate → confirm → execute / fix loop |
//! | [`backend`] | [`BackendClient`](backend::BackendClient) chat client, SSE streaming, [`BackendRegistry`](backend::BackendRegistry) |
//! | [`selector`] | [`ToolSelector`](selector::ToolSelector) preflight tool selection with fault-tolerant parsing |
//! | [`chat`] | [`ChatSession`](chat::ChatSession) token-budgeted history for follow-up mode |
//! | [`executor`] | Streaming shell command execution with live output |
//! | [`tools`] | Context tools: directory listing, environment, system info |
//! | [`prompt`] | System / fixing / explanation prompt assembly |
//! | [`config`] | YAML configuration, backend records, env overrides |
//!
//! # Flow
//!
//! ```text
//! prompt ──▶ ToolSelector ──▶ context tools ──▶ PromptBuilder
//!                                                    │
//!                         BackendClient ◀────────────┘
//!                              │
//!                    Session (confirm / edit / explain)
//!                              │
//!                         executor ──nonzero exit──▶ fix loop
//! ```

pub mod backend;
pub mod chat;
pub mod config;
pub mod editor;
pub mod error;
pub mod executor;
pub mod logging;
pub mod prompt;
pub mod selector;
pub mod session;
pub mod tools;
pub mod ui;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// Role of a message in a chat-completions conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation. Immutable once appended to a history.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}
