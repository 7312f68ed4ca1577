//! LLM summarization: replace the middle of history with a written summary.
//!
//! The heavier sibling of [`condense`](crate::context::condense::condense).
//! The first message (task anchor) and the last [`N_MESSAGES_TO_KEEP`]
//! messages stay verbatim; everything in between is sent to a
//! [`SummaryProvider`] and replaced by one assistant message flagged
//! `is_summary`. An earlier summary inside the span is merged rather than
//! re-summarized from scratch.

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::context::condense::{Compacted, CondenseRequest};
use crate::error::{CondenseError, SummaryError};
use crate::telemetry::CondenseKind;
use crate::tokens::TokenCounter;
use crate::{Message, flatten_for_counting};

/// Messages at the end of history that are never summarized.
pub const N_MESSAGES_TO_KEEP: usize = 3;

/// The instructions used for summarization unless the caller supplies
/// its own.
const SUMMARIZATION_PROMPT: &str = "\
Summarize the following conversation between a user and a coding agent. Focus on:
- The user's requests and how they evolved
- What was accomplished (completed subtasks, files created or modified)
- Key findings and decisions made
- Failed approaches (what was tried and why it failed)
- File paths, function names, and commands mentioned
- Current plan state and what remains to be done

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- If there is an existing summary, merge the new information into it to produce a single \
  cohesive summary. Do not simply append. The result must be a standalone summary that \
  replaces the existing one entirely.";

/// One summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    /// System-level instructions for the summarizing model.
    pub instructions: String,
    /// The rendered span of conversation to summarize.
    pub transcript: String,
}

/// What the provider returned.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResponse {
    pub text: String,
    /// Cost of the call in USD.
    pub cost: f64,
}

/// A model client able to answer a one-shot summarization request.
pub trait SummaryProvider: Send + Sync {
    fn summarize<'a>(
        &'a self,
        request: &'a SummaryRequest,
    ) -> BoxFuture<'a, Result<SummaryResponse, SummaryError>>;
}

impl<T: SummaryProvider + ?Sized> SummaryProvider for std::sync::Arc<T> {
    fn summarize<'a>(
        &'a self,
        request: &'a SummaryRequest,
    ) -> BoxFuture<'a, Result<SummaryResponse, SummaryError>> {
        (**self).summarize(request)
    }
}

/// Render a span of messages into a summarization request.
///
/// Summary messages inside the span become the "existing summary" that the
/// model is asked to merge into.
pub fn build_summary_request(span: &[Message], custom_prompt: Option<&str>) -> SummaryRequest {
    let instructions = custom_prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(SUMMARIZATION_PROMPT)
        .to_string();

    let mut transcript = String::new();
    let existing: Vec<String> = span
        .iter()
        .filter(|m| m.is_summary)
        .map(|m| m.content.joined_text())
        .collect();
    if !existing.is_empty() {
        transcript.push_str("=== EXISTING SUMMARY ===\n");
        transcript.push_str(&existing.join("\n\n"));
        transcript.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");
    }

    for msg in span.iter().filter(|m| !m.is_summary) {
        let text = msg.content.joined_text();
        let text = if text.is_empty() { "[no text content]" } else { &text };
        transcript.push_str(&format!("[{}]: {text}\n\n", msg.role));
    }

    SummaryRequest {
        instructions,
        transcript,
    }
}

/// Summarize `messages[1 .. len - N_MESSAGES_TO_KEEP]` with `provider`, or
/// with `request.condensing_provider` when one is set.
///
/// Rejects the result when the summarized history is not smaller than
/// `request.prev_context_tokens`. Like structural condensation, a counter
/// failure hands back the new history in [`CondenseError::Measurement`].
pub async fn summarize_conversation(
    messages: &[Message],
    provider: &dyn SummaryProvider,
    counter: &dyn TokenCounter,
    request: &CondenseRequest<'_>,
) -> Result<Compacted, CondenseError> {
    if messages.len() <= N_MESSAGES_TO_KEEP + 1 {
        return Err(CondenseError::NotEnoughMessages {
            count: messages.len(),
        });
    }

    let tail_start = messages.len() - N_MESSAGES_TO_KEEP;
    let (head, tail) = messages.split_at(tail_start);
    if tail.iter().any(|m| m.is_summary) {
        return Err(CondenseError::RecentlySummarized);
    }
    let Some((first, span)) = head.split_first() else {
        return Err(CondenseError::NotEnoughMessages {
            count: messages.len(),
        });
    };

    let summary_request = build_summary_request(span, request.custom_prompt);
    let provider = request.condensing_provider.unwrap_or(provider);
    let response = provider.summarize(&summary_request).await?;

    let summary = response.text.trim().to_string();
    if summary.is_empty() {
        warn!(task_id = request.task_id, "summarization returned no text");
        return Err(CondenseError::EmptySummary);
    }

    let mut new_messages = Vec::with_capacity(tail.len() + 2);
    new_messages.push(first.clone());
    new_messages.push(Message::summary(summary.clone()));
    new_messages.extend_from_slice(tail);

    let blocks = flatten_for_counting(&new_messages);
    let new_context_tokens = match counter.count_tokens(&blocks).await {
        Ok(tokens) => tokens,
        Err(source) => {
            return Err(CondenseError::Measurement {
                messages: new_messages,
                source,
            });
        }
    };

    if new_context_tokens >= request.prev_context_tokens {
        warn!(
            task_id = request.task_id,
            prev_tokens = request.prev_context_tokens,
            new_tokens = new_context_tokens,
            "summary did not shrink the context"
        );
        return Err(CondenseError::ContextGrew {
            prev: request.prev_context_tokens,
            new: new_context_tokens,
        });
    }

    request.telemetry.record_condensation(
        request.task_id,
        CondenseKind::Summarized,
        request.is_automatic_trigger,
    );
    info!(
        task_id = request.task_id,
        summarized_messages = span.len(),
        prev_tokens = request.prev_context_tokens,
        new_tokens = new_context_tokens,
        cost = response.cost,
        "summarized conversation"
    );

    Ok(Compacted::Summarized {
        messages: new_messages,
        summary,
        cost: response.cost,
        new_context_tokens,
    })
}
