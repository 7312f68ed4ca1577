//! Per-turn context policy for the agent loop.
//!
//! [`ContextManager::manage`] is called once per turn, before the next
//! request is built, with the latest measured token total:
//!
//! 1. If condensation is enabled and the threshold policy says so, run the
//!    configured compaction strategy. A pass that changed history and
//!    brought it within the allowed tokens ends the turn's work.
//! 2. If history still exceeds the allowed tokens (context window minus a
//!    10% buffer minus the output reserve), drop the oldest half with the
//!    sliding-window truncator. When step 1 changed history, the truncator
//!    runs on the compacted history.
//! 3. Otherwise leave history alone.
//!
//! Measurement failures are returned to the caller; every other compaction
//! failure is logged and falls through to step 2.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Message;
use crate::config::{
    CondenseStrategy, ContextConfig, DEFAULT_TRUNCATION_FRACTION, INHERIT_THRESHOLD,
};
use crate::context::condense::{Compacted, CondenseRequest, ToolAllowList, condense};
use crate::context::summarizer::{SummaryProvider, summarize_conversation};
use crate::context::threshold::{
    ContextUsage, MAX_CONDENSE_THRESHOLD, MIN_CONDENSE_THRESHOLD, allowed_tokens,
};
use crate::context::truncate::truncate_conversation;
use crate::error::CondenseError;
use crate::telemetry::{NoopTelemetry, TelemetrySink};
use crate::tokens::TokenCounter;

/// Per-turn input to [`ContextManager::manage`].
#[derive(Debug, Clone, Copy)]
pub struct ManageRequest<'a> {
    /// Tokens in history as last measured, system prompt excluded.
    pub total_tokens: u64,
    pub task_id: &'a str,
    /// Active API profile, for per-profile threshold overrides.
    pub profile_id: Option<&'a str>,
}

impl<'a> ManageRequest<'a> {
    pub fn new(total_tokens: u64, task_id: &'a str) -> Self {
        Self {
            total_tokens,
            task_id,
            profile_id: None,
        }
    }

    pub fn with_profile(mut self, profile_id: &'a str) -> Self {
        self.profile_id = Some(profile_id);
        self
    }
}

/// What [`ContextManager::manage`] did this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ManageOutcome {
    Unchanged,
    Condensed(Compacted),
    Truncated { messages: Vec<Message>, removed: usize },
}

impl ManageOutcome {
    /// The history to use from now on. `original` is returned as-is when
    /// nothing changed.
    pub fn into_messages(self, original: Vec<Message>) -> Vec<Message> {
        match self {
            ManageOutcome::Unchanged => original,
            ManageOutcome::Condensed(compacted) => compacted.into_messages(),
            ManageOutcome::Truncated { messages, .. } => messages,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, ManageOutcome::Unchanged)
    }
}

/// Owns the context policy and its collaborators for one agent.
pub struct ContextManager {
    config: ContextConfig,
    tools: ToolAllowList,
    counter: Arc<dyn TokenCounter>,
    telemetry: Arc<dyn TelemetrySink>,
    summarizer: Option<Arc<dyn SummaryProvider>>,
    condensing_provider: Option<Arc<dyn SummaryProvider>>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("has_summarizer", &self.summarizer.is_some())
            .finish_non_exhaustive()
    }
}

impl ContextManager {
    pub fn new(config: ContextConfig, counter: impl TokenCounter + 'static) -> Self {
        let tools = config.condense.config.allow_list();
        Self {
            config,
            tools,
            counter: Arc::new(counter),
            telemetry: Arc::new(NoopTelemetry),
            summarizer: None,
            condensing_provider: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: impl TelemetrySink + 'static) -> Self {
        self.telemetry = Arc::new(telemetry);
        self
    }

    /// Provider used by the `summarize` strategy.
    pub fn with_summarizer(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.summarizer = Some(provider);
        self
    }

    /// Dedicated provider for summarization calls, preferred over the
    /// main summarizer when set.
    pub fn with_condensing_provider(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.condensing_provider = Some(provider);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The threshold percent in effect for `profile_id`.
    ///
    /// Profile overrides of `-1` inherit the global value; overrides outside
    /// `[5, 100]` are ignored with a warning.
    pub fn threshold_for(&self, profile_id: Option<&str>) -> f64 {
        let global = self.config.condense.config.threshold_percent;
        let Some(profile) = profile_id else {
            return global;
        };
        match self.config.profile_thresholds.get(profile).copied() {
            None => global,
            Some(t) if t == INHERIT_THRESHOLD => global,
            Some(t) if (MIN_CONDENSE_THRESHOLD..=MAX_CONDENSE_THRESHOLD).contains(&t) => t,
            Some(t) => {
                warn!(profile, threshold = t, "invalid profile threshold; using global value");
                global
            }
        }
    }

    /// Usage snapshot for `total_tokens` under this manager's config.
    pub fn usage(&self, total_tokens: u64, profile_id: Option<&str>) -> ContextUsage {
        ContextUsage::measure(
            total_tokens,
            self.config.context_window,
            self.config.max_output_tokens,
            self.threshold_for(profile_id),
        )
    }

    /// Run the configured compaction strategy now, regardless of the
    /// threshold (e.g. the user asked for it).
    pub async fn condense_now(
        &self,
        messages: &[Message],
        task_id: &str,
        prev_context_tokens: u64,
    ) -> Result<Compacted, CondenseError> {
        self.compact(messages, task_id, prev_context_tokens, false)
            .await
    }

    /// Apply the per-turn policy described in the module docs.
    pub async fn manage(
        &self,
        messages: &[Message],
        request: ManageRequest<'_>,
    ) -> Result<ManageOutcome, CondenseError> {
        let usage = self.usage(request.total_tokens, request.profile_id);
        debug!(task_id = request.task_id, "{}", usage.to_log_string());

        let allowed = allowed_tokens(self.config.context_window, self.config.max_output_tokens);
        let mut current_tokens = request.total_tokens;
        let mut compacted_history: Option<Vec<Message>> = None;

        if self.config.condense.enabled && usage.exceeds_threshold() {
            match self
                .compact(messages, request.task_id, request.total_tokens, true)
                .await
            {
                Ok(compacted) if compacted.is_noop() => {
                    debug!(task_id = request.task_id, "nothing to condense");
                }
                Ok(compacted) if compacted.new_context_tokens() <= allowed => {
                    return Ok(ManageOutcome::Condensed(compacted));
                }
                Ok(compacted) => {
                    warn!(
                        task_id = request.task_id,
                        new_tokens = compacted.new_context_tokens(),
                        allowed,
                        "history still over budget after compaction"
                    );
                    current_tokens = compacted.new_context_tokens();
                    compacted_history = Some(compacted.into_messages());
                }
                Err(e) if e.is_measurement() => return Err(e),
                Err(e) => {
                    warn!(task_id = request.task_id, error = %e, "compaction skipped");
                }
            }
        }

        if current_tokens > allowed {
            let history = compacted_history.as_deref().unwrap_or(messages);
            let truncated = truncate_conversation(
                history,
                self.truncation_fraction(),
                request.task_id,
                self.telemetry.as_ref(),
            );
            let removed = history.len() - truncated.len();
            return Ok(ManageOutcome::Truncated {
                messages: truncated,
                removed,
            });
        }

        Ok(ManageOutcome::Unchanged)
    }

    async fn compact(
        &self,
        messages: &[Message],
        task_id: &str,
        prev_context_tokens: u64,
        automatic: bool,
    ) -> Result<Compacted, CondenseError> {
        let settings = &self.config.condense.config;
        let mut request = CondenseRequest::new(task_id, prev_context_tokens)
            .with_telemetry(self.telemetry.as_ref());
        if automatic {
            request = request.automatic();
        }
        if let Some(prompt) = settings.custom_prompt.as_deref() {
            request = request.with_custom_prompt(prompt);
        }
        if let Some(provider) = self.condensing_provider.as_deref() {
            request = request.with_condensing_provider(provider);
        }

        match (settings.strategy, self.summarizer.as_deref()) {
            (CondenseStrategy::Summarize, Some(provider)) => {
                summarize_conversation(messages, provider, self.counter.as_ref(), &request).await
            }
            (CondenseStrategy::Summarize, None) => {
                warn!(task_id, "summarize strategy has no provider; condensing structurally");
                condense(messages, &self.tools, self.counter.as_ref(), &request).await
            }
            (CondenseStrategy::Structural, _) => {
                condense(messages, &self.tools, self.counter.as_ref(), &request).await
            }
        }
    }

    fn truncation_fraction(&self) -> f64 {
        let fraction = self.config.truncation_fraction;
        if (0.0..=1.0).contains(&fraction) {
            fraction
        } else {
            warn!(fraction, "truncation fraction out of range; using default");
            DEFAULT_TRUNCATION_FRACTION
        }
    }
}
