//! Tool-call bookkeeping for the agent loop.
//!
//! - [`names`]: canonical tool names and the high-volume allow-list used by
//!   condensation.
//! - [`repetition`]: [`RepetitionDetector`], the per-task guard against
//!   identical tool calls issued back to back.

pub mod names;
pub mod repetition;

pub use repetition::{Recovery, RepetitionCheck, RepetitionDetector, ToolInvocation};
