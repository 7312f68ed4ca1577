//! Convenience re-exports for common `ctxguard` types.
//!
//! Meant to be glob-imported by agent loops:
//!
//! ```ignore
//! use ctxguard::prelude::*;
//! ```
//!
//! Lower-level pieces (block-level condensation, header parsing, the
//! summarization request builder) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ContentBlock, Message, MessageContent, MessageRole, flatten_for_counting, load_conversation,
};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::{
    CondenseConfig, CondenseStrategy, ContextConfig, RepetitionConfig, RepetitionExemption,
    Toggle,
};
pub use crate::error::{CondenseError, ConfigError, SummaryError, TokenCountError};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    Compacted, CondenseRequest, ContextManager, ContextUsage, ManageOutcome, ManageRequest,
    SummaryProvider, SummaryRequest, SummaryResponse, ToolAllowList, condense, should_compact,
    summarize_conversation, truncate_conversation,
};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::i18n::{Localizer, StaticLocalizer};
pub use crate::telemetry::{CondenseKind, NoopTelemetry, TelemetrySink, TracingTelemetry};
pub use crate::tokens::{AnthropicTokenCounter, CharRatioCounter, TokenCounter};

// ── Loop safety ─────────────────────────────────────────────────────
pub use crate::tools::{Recovery, RepetitionCheck, RepetitionDetector, ToolInvocation};
