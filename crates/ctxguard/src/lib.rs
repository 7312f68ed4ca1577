//! Context-budget and loop-safety core for long-running LLM coding agents.
//!
//! `ctxguard` keeps a multi-turn conversation inside a bounded token budget
//! and stops the agent loop from spinning on the same tool call forever. It
//! does not talk to a model or run tools itself: the orchestrator owns the
//! message history and calls into this crate at two points of every turn.
//!
//! - **Before sending a request:** ask the threshold policy whether the
//!   history should be compacted, and if so run a compaction strategy.
//! - **Before dispatching a tool call:** ask the [`RepetitionDetector`]
//!   whether the call may run.
//!
//! ```ignore
//! use ctxguard::prelude::*;
//!
//! let manager = ContextManager::new(ContextConfig::default(), CharRatioCounter::default());
//! let outcome = manager
//!     .manage(&messages, ManageRequest::new(total_tokens, "task-1"))
//!     .await?;
//! let messages = outcome.into_messages(messages);
//!
//! let mut detector = RepetitionDetector::new(3);
//! if let RepetitionCheck::Blocked { hint, .. } = detector.check(&invocation) {
//!     // Feed `hint` back to the model instead of executing the tool.
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Threshold policy, sliding-window truncation, tool-result condensation, summarization, [`ContextManager`] |
//! | [`tools`] | Canonical tool names and the [`RepetitionDetector`] |
//! | [`tokens`] | [`TokenCounter`] collaborator trait with local and remote implementations |
//! | [`telemetry`] | Fire-and-forget compaction events |
//! | [`i18n`] | Localized user-facing strings |
//! | [`config`] | [`ContextConfig`] and JSON loading |
//!
//! [`RepetitionDetector`]: tools::repetition::RepetitionDetector
//! [`ContextManager`]: context::manager::ContextManager
//! [`TokenCounter`]: tokens::TokenCounter
//! [`ContextConfig`]: config::ContextConfig

pub mod config;
pub mod context;
pub mod error;
pub mod i18n;
pub mod prelude;
pub mod telemetry;
pub mod tokens;
pub mod tools;

use serde::{Deserialize, Serialize};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Source of an image block. Opaque to this crate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

/// One block of structured message content.
///
/// Only `Text` blocks are ever inspected or rewritten; images pass through
/// every compaction strategy untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                kind: "base64".into(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    /// The block's text, or `None` for non-text blocks.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// Message body: either a plain string or an ordered list of blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten into token-countable blocks. A plain string becomes one text block.
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(s) => vec![ContentBlock::text(s.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text blocks, separated by newlines.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    /// Set on messages produced by LLM summarization.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(content.into()),
            is_summary: false,
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Blocks(blocks),
            is_summary: false,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
            is_summary: false,
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(blocks),
            is_summary: false,
        }
    }

    /// An assistant message carrying a conversation summary.
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::text(text)]),
            is_summary: true,
        }
    }
}

/// Flatten a message history into one token-countable block sequence.
///
/// The system prompt is deliberately not part of the output, so counts
/// taken before and after a compaction pass are comparable.
pub fn flatten_for_counting(messages: &[Message]) -> Vec<ContentBlock> {
    messages.iter().flat_map(|m| m.content.to_blocks()).collect()
}

/// Load a conversation (a JSON array of [`Message`]) from disk.
pub fn load_conversation(path: &std::path::Path) -> Result<Vec<Message>, error::ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| error::ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| error::ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
