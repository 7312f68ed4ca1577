//! Sliding-window truncation: drop the oldest message pairs after the first.
//!
//! Content-agnostic and cheap. The first message anchors the task (it
//! carries the original request) and is never removed. Removal counts are
//! rounded down to an even number so a request is never separated from its
//! response.

use crate::Message;
use crate::telemetry::TelemetrySink;
use tracing::debug;

/// Number of messages a truncation of `len` messages by `fraction_to_remove`
/// drops: `floor((len - 1) * fraction)` rounded down to even.
pub fn removal_count(len: usize, fraction_to_remove: f64) -> usize {
    if len <= 1 {
        return 0;
    }
    let raw = ((len - 1) as f64 * fraction_to_remove).floor() as usize;
    raw - raw % 2
}

/// Return `messages` with the oldest `removal_count(..)` messages after the
/// first removed.
///
/// `fraction_to_remove` must lie in `[0, 1]`; checking that is the caller's
/// job (see [`ContextConfig::validate`](crate::config::ContextConfig::validate)).
/// Emits one truncation event to `telemetry` per call.
pub fn truncate_conversation(
    messages: &[Message],
    fraction_to_remove: f64,
    task_id: &str,
    telemetry: &dyn TelemetrySink,
) -> Vec<Message> {
    debug_assert!(
        (0.0..=1.0).contains(&fraction_to_remove),
        "fraction_to_remove out of range: {fraction_to_remove}"
    );
    telemetry.record_truncation(task_id);

    let Some((first, rest)) = messages.split_first() else {
        return Vec::new();
    };
    let remove = removal_count(messages.len(), fraction_to_remove).min(rest.len());
    debug!(
        task_id,
        total = messages.len(),
        removed = remove,
        "truncating conversation"
    );

    let mut out = Vec::with_capacity(messages.len() - remove);
    out.push(first.clone());
    out.extend_from_slice(&rest[remove..]);
    out
}
