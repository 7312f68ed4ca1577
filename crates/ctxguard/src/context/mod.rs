//! Context window management: thresholds, truncation, condensation, and
//! summarization.
//!
//! The context window is the scarcest resource in any LLM agent. This module
//! provides layered strategies for keeping history under control:
//!
//! 1. **[`threshold`]**: pure policy deciding *when* to compact, from the
//!    measured token total, the context window, and a clamped percentage.
//!
//! 2. **[`condense`]**: replaces bodies of high-volume tool results with a
//!    placeholder. No LLM call needed; headers stay so the model still knows
//!    what it looked at. Tool-result headers are recognized by [`header`].
//!
//! 3. **[`summarizer`]**: LLM-based summarization of the middle of history,
//!    for when structural condensation isn't the configured strategy.
//!
//! 4. **[`truncate`]**: sliding-window removal of the oldest message pairs.
//!    The last resort when history no longer fits at all.
//!
//! [`manager`] ties them together into the per-turn policy the agent loop
//! calls.

pub mod condense;
pub mod header;
pub mod manager;
pub mod summarizer;
pub mod threshold;
pub mod truncate;

// Re-export commonly used items at the module level.
pub use condense::{CONDENSED_PLACEHOLDER, Compacted, CondenseRequest, ToolAllowList, condense};
pub use manager::{ContextManager, ManageOutcome, ManageRequest};
pub use summarizer::{SummaryProvider, SummaryRequest, SummaryResponse, summarize_conversation};
pub use threshold::{ContextUsage, should_compact};
pub use truncate::truncate_conversation;
