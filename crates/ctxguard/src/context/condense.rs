//! Tool-result condensation: collapse bulky tool output to a placeholder.
//!
//! Tool results are the single largest context consumer in any agent loop.
//! A `read_file` can inject 30KB; a `search_files` can return hundreds of
//! lines. Most of it is irrelevant once the model has acted on it. This
//! module finds results of high-volume tools in user messages and replaces
//! their bodies with [`CONDENSED_PLACEHOLDER`], keeping the header so the
//! model still sees *what* it called and with which argument.
//!
//! No LLM call is made. The pass builds a new message vector, then asks the
//! [`TokenCounter`] to measure it.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::context::header::{is_header, parse_header};
use crate::context::summarizer::SummaryProvider;
use crate::error::CondenseError;
use crate::telemetry::{CondenseKind, NoopTelemetry, TelemetrySink};
use crate::tokens::TokenCounter;
use crate::tools::names::HIGH_VOLUME_TOOLS;
use crate::{ContentBlock, Message, MessageContent, MessageRole, flatten_for_counting};

/// Text that replaces a condensed result body.
///
/// Both the writer and the "already condensed?" check reference this
/// constant so they can't drift out of sync.
pub const CONDENSED_PLACEHOLDER: &str = "[Result removed for context reduction]";

/// Blocks after a header that belong to its result: the body, then an
/// optional continuation hint.
const MAX_RESULT_BLOCKS: usize = 2;

/// Tool names whose results may be condensed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAllowList {
    names: HashSet<String>,
}

impl Default for ToolAllowList {
    fn default() -> Self {
        HIGH_VOLUME_TOOLS.iter().copied().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ToolAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolAllowList {
    /// An allow-list that condenses nothing.
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    /// Add a tool name.
    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ── Result shape ───────────────────────────────────────────────────

/// Outcome of a successful compaction pass.
///
/// Structural condensation and LLM summarization share the orchestrator's
/// code path but not their fields: only [`Compacted::Summarized`] carries a
/// summary and a cost.
#[derive(Debug, Clone, PartialEq)]
pub enum Compacted {
    /// Tool-result bodies were replaced with placeholders.
    Structural {
        messages: Vec<Message>,
        new_context_tokens: u64,
        /// Number of results collapsed in this pass.
        condensed_results: usize,
    },
    /// A span of history was replaced by an LLM-written summary.
    Summarized {
        messages: Vec<Message>,
        summary: String,
        cost: f64,
        new_context_tokens: u64,
    },
}

impl Compacted {
    pub fn messages(&self) -> &[Message] {
        match self {
            Compacted::Structural { messages, .. } | Compacted::Summarized { messages, .. } => {
                messages
            }
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Compacted::Structural { messages, .. } | Compacted::Summarized { messages, .. } => {
                messages
            }
        }
    }

    /// Tokens in the compacted history, system prompt excluded.
    pub fn new_context_tokens(&self) -> u64 {
        match self {
            Compacted::Structural {
                new_context_tokens, ..
            }
            | Compacted::Summarized {
                new_context_tokens, ..
            } => *new_context_tokens,
        }
    }

    /// The summary text. `None` for structural condensation.
    pub fn summary(&self) -> Option<&str> {
        match self {
            Compacted::Structural { .. } => None,
            Compacted::Summarized { summary, .. } => Some(summary),
        }
    }

    /// Cost of the pass in USD. Structural condensation is free.
    pub fn cost(&self) -> f64 {
        match self {
            Compacted::Structural { .. } => 0.0,
            Compacted::Summarized { cost, .. } => *cost,
        }
    }

    /// Whether the pass left history exactly as it was.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Compacted::Structural {
                condensed_results: 0,
                ..
            }
        )
    }

    pub fn kind(&self) -> CondenseKind {
        match self {
            Compacted::Structural { .. } => CondenseKind::Structural,
            Compacted::Summarized { .. } => CondenseKind::Summarized,
        }
    }
}

// ── Request ────────────────────────────────────────────────────────

/// Per-call parameters for a compaction pass.
///
/// The summarization fields (`custom_prompt`, `condensing_provider`) are
/// read only by [`summarize_conversation`](crate::context::summarizer::summarize_conversation);
/// structural condensation ignores them.
#[derive(Clone, Copy)]
pub struct CondenseRequest<'a> {
    pub task_id: &'a str,
    /// Token count of the history before this pass, system prompt excluded.
    pub prev_context_tokens: u64,
    /// Whether the threshold policy triggered the pass (vs. a user request).
    pub is_automatic_trigger: bool,
    /// Replacement summarization instructions.
    pub custom_prompt: Option<&'a str>,
    /// Dedicated (usually cheaper) provider for summarization calls.
    pub condensing_provider: Option<&'a dyn SummaryProvider>,
    pub telemetry: &'a dyn TelemetrySink,
}

impl<'a> CondenseRequest<'a> {
    pub fn new(task_id: &'a str, prev_context_tokens: u64) -> Self {
        Self {
            task_id,
            prev_context_tokens,
            is_automatic_trigger: false,
            custom_prompt: None,
            condensing_provider: None,
            telemetry: &NoopTelemetry,
        }
    }

    /// Mark the pass as triggered by the threshold policy.
    pub fn automatic(mut self) -> Self {
        self.is_automatic_trigger = true;
        self
    }

    pub fn with_custom_prompt(mut self, prompt: &'a str) -> Self {
        self.custom_prompt = Some(prompt);
        self
    }

    pub fn with_condensing_provider(mut self, provider: &'a dyn SummaryProvider) -> Self {
        self.condensing_provider = Some(provider);
        self
    }

    pub fn with_telemetry(mut self, telemetry: &'a dyn TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }
}

// ── Structural pass ────────────────────────────────────────────────

/// Whether a block may be consumed as part of a result body.
fn is_result_block(block: &ContentBlock) -> bool {
    match block.as_text() {
        Some(text) => text != CONDENSED_PLACEHOLDER && !is_header(text),
        None => false,
    }
}

/// Condense one block sequence. Returns the new blocks and the number of
/// results collapsed.
///
/// After an allow-listed header, up to two following text blocks are
/// replaced by a single placeholder. Removal stops early at a non-text
/// block, at another header, or at an existing placeholder, so a result
/// that was already condensed is left alone.
pub fn condense_blocks(
    blocks: &[ContentBlock],
    tools: &ToolAllowList,
) -> (Vec<ContentBlock>, usize) {
    let mut out = Vec::with_capacity(blocks.len());
    let mut condensed = 0;
    let mut i = 0;

    while let Some(block) = blocks.get(i) {
        out.push(block.clone());
        i += 1;

        let Some(header) = block.as_text().and_then(parse_header) else {
            continue;
        };
        if !tools.contains(header.tool_name) {
            continue;
        }

        let body_len = blocks
            .get(i..)
            .unwrap_or_default()
            .iter()
            .take(MAX_RESULT_BLOCKS)
            .take_while(|b| is_result_block(b))
            .count();
        if body_len == 0 {
            continue;
        }

        debug!(
            tool = header.tool_name,
            argument = header.argument.unwrap_or(""),
            removed_blocks = body_len,
            "condensing tool result"
        );
        out.push(ContentBlock::text(CONDENSED_PLACEHOLDER));
        i += body_len;
        condensed += 1;
    }

    (out, condensed)
}

/// Condense every user message with block content. Other messages are
/// copied through unchanged.
pub fn condense_messages(messages: &[Message], tools: &ToolAllowList) -> (Vec<Message>, usize) {
    let mut total = 0;
    let out = messages
        .iter()
        .map(|msg| match (&msg.role, &msg.content) {
            (MessageRole::User, MessageContent::Blocks(blocks)) => {
                let (blocks, n) = condense_blocks(blocks, tools);
                total += n;
                Message {
                    content: MessageContent::Blocks(blocks),
                    ..msg.clone()
                }
            }
            _ => msg.clone(),
        })
        .collect();
    (out, total)
}

/// Run a structural condensation pass and measure the result.
///
/// The returned token count covers the flattened message history only
/// (no system prompt), so it compares directly with
/// `request.prev_context_tokens`. Running the pass again over its own
/// output changes nothing.
///
/// If the counter fails, the condensed history is returned inside
/// [`CondenseError::Measurement`]; callers keep it and re-measure.
pub async fn condense(
    messages: &[Message],
    tools: &ToolAllowList,
    counter: &dyn TokenCounter,
    request: &CondenseRequest<'_>,
) -> Result<Compacted, CondenseError> {
    let (messages, condensed_results) = condense_messages(messages, tools);
    if condensed_results > 0 {
        request.telemetry.record_condensation(
            request.task_id,
            CondenseKind::Structural,
            request.is_automatic_trigger,
        );
    }

    let blocks = flatten_for_counting(&messages);
    let new_context_tokens = match counter.count_tokens(&blocks).await {
        Ok(tokens) => tokens,
        Err(source) => {
            warn!(
                task_id = request.task_id,
                condensed_results,
                error = %source,
                "condensed history could not be measured"
            );
            return Err(CondenseError::Measurement { messages, source });
        }
    };

    info!(
        task_id = request.task_id,
        condensed_results,
        prev_tokens = request.prev_context_tokens,
        new_tokens = new_context_tokens,
        "condensed tool results"
    );

    Ok(Compacted::Structural {
        messages,
        new_context_tokens,
        condensed_results,
    })
}
