//! Threshold policy: decides when message history must be compacted.
//!
//! The decision is a pure function of the measured history size, the
//! model's context window, the tokens reserved for the reply, and a
//! configured percentage. It never reads or edits messages.

/// Lowest accepted compaction threshold, in percent of available tokens.
pub const MIN_CONDENSE_THRESHOLD: f64 = 5.0;

/// Highest accepted compaction threshold, in percent of available tokens.
pub const MAX_CONDENSE_THRESHOLD: f64 = 100.0;

/// Tokens reserved for the model's reply when the caller does not say.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 8192;

/// Fraction of the context window kept free before hard truncation kicks in.
pub const TOKEN_BUFFER_PERCENTAGE: f64 = 0.10;

/// Clamp a configured threshold into `[MIN_CONDENSE_THRESHOLD, MAX_CONDENSE_THRESHOLD]`.
///
/// A non-finite value clamps to the minimum, which compacts early rather
/// than never.
pub fn clamp_threshold(configured_percent: f64) -> f64 {
    if configured_percent.is_nan() {
        return MIN_CONDENSE_THRESHOLD;
    }
    configured_percent.clamp(MIN_CONDENSE_THRESHOLD, MAX_CONDENSE_THRESHOLD)
}

/// Returns `true` when history should be compacted before the next request.
///
/// A context window no larger than the output reserve leaves no room at all
/// and always reports `true`.
pub fn should_compact(
    total_tokens: u64,
    context_window: u64,
    max_output_tokens: Option<u64>,
    configured_percent: f64,
) -> bool {
    ContextUsage::measure(
        total_tokens,
        context_window,
        max_output_tokens,
        configured_percent,
    )
    .exceeds_threshold()
}

/// Tokens history may occupy before the fallback truncation runs:
/// the context window minus a 10% buffer, minus the output reserve.
pub fn allowed_tokens(context_window: u64, max_output_tokens: Option<u64>) -> u64 {
    let reserved = max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
    let buffered = (context_window as f64 * (1.0 - TOKEN_BUFFER_PERCENTAGE)) as u64;
    buffered.saturating_sub(reserved)
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    /// Measured tokens in history.
    pub total_tokens: u64,
    /// Context window minus the output reserve. May be zero or negative.
    pub available_tokens: i64,
    /// `total / available * 100`. `None` when `available_tokens <= 0`.
    pub used_percent: Option<f64>,
    /// Configured threshold after clamping.
    pub threshold_percent: f64,
}

impl ContextUsage {
    pub fn measure(
        total_tokens: u64,
        context_window: u64,
        max_output_tokens: Option<u64>,
        configured_percent: f64,
    ) -> Self {
        let reserved = max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        let window = i64::try_from(context_window).unwrap_or(i64::MAX);
        let reserved = i64::try_from(reserved).unwrap_or(i64::MAX);
        let available_tokens = window.saturating_sub(reserved);
        let used_percent = if available_tokens > 0 {
            let pct = total_tokens as f64 / available_tokens as f64 * 100.0;
            pct.is_finite().then_some(pct)
        } else {
            None
        };

        Self {
            total_tokens,
            available_tokens,
            used_percent,
            threshold_percent: clamp_threshold(configured_percent),
        }
    }

    /// Whether usage meets the threshold. Unmeasurable usage always does.
    pub fn exceeds_threshold(&self) -> bool {
        match self.used_percent {
            Some(pct) => pct >= self.threshold_percent,
            None => true,
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        match self.used_percent {
            Some(pct) => format!(
                "context: ~{} tokens ({:.1}% of {} available, threshold {:.0}%)",
                self.total_tokens, pct, self.available_tokens, self.threshold_percent,
            ),
            None => format!(
                "context: ~{} tokens (no room: {} available, threshold {:.0}%)",
                self.total_tokens, self.available_tokens, self.threshold_percent,
            ),
        }
    }
}
