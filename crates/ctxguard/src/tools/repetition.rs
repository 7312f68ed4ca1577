//! Repetition detection: stop the agent from issuing the same tool call
//! over and over.
//!
//! Each proposed call is reduced to a canonical signature (tool name plus
//! parameters with every object's keys sorted), so parameter order never
//! matters. When the same signature arrives `limit` times in a row the call
//! is blocked and the detector hands back guidance text for the model's own
//! reasoning. The counter then resets, so the model gets a fresh budget
//! after being nudged.
//!
//! One detector belongs to one task. It is plain owned state: create it at
//! session start, drop it at session end.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{RepetitionConfig, RepetitionExemption};
use crate::i18n::{Localizer, REPETITION_LIMIT_REACHED, StaticLocalizer, localize_or_key};

/// Reason reported when a call cannot be canonicalized.
pub const SERIALIZE_FAILURE_REASON: &str = "failed to serialize tool call";

/// A proposed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation<P = BTreeMap<String, String>> {
    pub name: String,
    pub params: P,
}

impl<P> ToolInvocation<P> {
    pub fn new(name: impl Into<String>, params: P) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl ToolInvocation {
    /// Build a string-parameter invocation from `(key, value)` pairs.
    pub fn from_pairs(name: impl Into<String>, pairs: &[(&str, &str)]) -> Self {
        Self::new(
            name,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// What the orchestrator should do after a blocked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recovery {
    /// Feed the hint back to the model and continue.
    None,
    /// The model produced malformed parameters; switch mode or model.
    SwitchMode,
    /// Ask the user for guidance.
    AskUser,
}

/// Verdict for one proposed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepetitionCheck {
    Allow,
    Blocked {
        recovery: Recovery,
        /// User-facing explanation.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Guidance for the model's next step.
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
}

impl RepetitionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RepetitionCheck::Allow)
    }

    pub fn recovery(&self) -> Option<Recovery> {
        match self {
            RepetitionCheck::Allow => None,
            RepetitionCheck::Blocked { recovery, .. } => Some(*recovery),
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            RepetitionCheck::Blocked { hint, .. } => hint.as_deref(),
            RepetitionCheck::Allow => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RepetitionCheck::Blocked { reason, .. } => reason.as_deref(),
            RepetitionCheck::Allow => None,
        }
    }
}

// ── Canonical signature ────────────────────────────────────────────

/// Deterministic string form of an invocation: compact JSON of
/// `{"name": .., "params": ..}` with object keys sorted at every depth.
pub fn canonical_signature<P: Serialize>(
    invocation: &ToolInvocation<P>,
) -> Result<String, serde_json::Error> {
    let params = serde_json::to_value(&invocation.params)?;
    Ok(signature_of(&invocation.name, &params))
}

fn signature_of(name: &str, params: &Value) -> String {
    let mut out = String::from("{\"name\":");
    write_canonical(&Value::String(name.to_string()), &mut out);
    out.push_str(",\"params\":");
    write_canonical(params, &mut out);
    out.push('}');
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ── Detector ───────────────────────────────────────────────────────

/// Tracks consecutive identical tool calls for one task.
pub struct RepetitionDetector {
    limit: u32,
    exemptions: Vec<RepetitionExemption>,
    localizer: Arc<dyn Localizer>,
    previous_signature: Option<String>,
    consecutive_count: u32,
}

impl fmt::Debug for RepetitionDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepetitionDetector")
            .field("limit", &self.limit)
            .field("exemptions", &self.exemptions)
            .field("previous_signature", &self.previous_signature)
            .field("consecutive_count", &self.consecutive_count)
            .finish_non_exhaustive()
    }
}

impl RepetitionDetector {
    /// Detector with the default exemptions and the English catalog.
    /// A `limit` of `0` disables detection.
    pub fn new(limit: u32) -> Self {
        Self::from_config(&RepetitionConfig {
            limit,
            ..RepetitionConfig::default()
        })
    }

    pub fn from_config(config: &RepetitionConfig) -> Self {
        Self {
            limit: config.limit,
            exemptions: config.exemptions.clone(),
            localizer: Arc::new(StaticLocalizer::english()),
            previous_signature: None,
            consecutive_count: 0,
        }
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = localizer;
        self
    }

    pub fn with_exemption(mut self, exemption: RepetitionExemption) -> Self {
        self.exemptions.push(exemption);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Consecutive occurrences of the current signature. `0` when idle.
    pub fn consecutive_count(&self) -> u32 {
        self.consecutive_count
    }

    pub fn previous_signature(&self) -> Option<&str> {
        self.previous_signature.as_deref()
    }

    /// Return to the idle state.
    pub fn reset(&mut self) {
        self.previous_signature = None;
        self.consecutive_count = 0;
    }

    /// Decide whether `invocation` may run, updating the streak.
    pub fn check<P: Serialize>(&mut self, invocation: &ToolInvocation<P>) -> RepetitionCheck {
        if self.limit == 0 {
            return RepetitionCheck::Allow;
        }

        let params = match serde_json::to_value(&invocation.params) {
            Ok(params) => params,
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "tool call could not be canonicalized");
                return RepetitionCheck::Blocked {
                    recovery: Recovery::SwitchMode,
                    reason: Some(SERIALIZE_FAILURE_REASON.to_string()),
                    hint: None,
                };
            }
        };

        if self.is_exempt(&invocation.name, &params) {
            debug!(tool = %invocation.name, "repetition check skipped for exempt call");
            return RepetitionCheck::Allow;
        }

        let signature = signature_of(&invocation.name, &params);
        if self.previous_signature.as_deref() == Some(signature.as_str()) {
            self.consecutive_count += 1;
        } else {
            self.consecutive_count = 1;
            self.previous_signature = Some(signature);
        }

        if self.consecutive_count >= self.limit {
            warn!(
                tool = %invocation.name,
                count = self.consecutive_count,
                limit = self.limit,
                "blocking repeated tool call"
            );
            let count = self.consecutive_count;
            self.reset();
            return RepetitionCheck::Blocked {
                recovery: Recovery::None,
                reason: None,
                hint: Some(repetition_hint(&invocation.name, count)),
            };
        }

        RepetitionCheck::Allow
    }

    /// Escalation for callers that still cannot make progress after the
    /// automatic hint: ask the user, with a localized explanation.
    pub fn build_ask_user_response(&self, tool_name: &str) -> RepetitionCheck {
        let reason = localize_or_key(
            self.localizer.as_ref(),
            REPETITION_LIMIT_REACHED,
            &[("tool_name", tool_name)],
        );
        RepetitionCheck::Blocked {
            recovery: Recovery::AskUser,
            reason: Some(reason),
            hint: None,
        }
    }

    fn is_exempt(&self, name: &str, params: &Value) -> bool {
        self.exemptions.iter().any(|e| {
            e.tool == name
                && params
                    .get(&e.param)
                    .and_then(Value::as_str)
                    .is_some_and(|v| e.values.iter().any(|allowed| allowed == v))
        })
    }
}

fn repetition_hint(tool_name: &str, count: u32) -> String {
    format!(
        "You have called `{tool_name}` with identical parameters {count} times in a row, \
         and repeating it will not produce a different result. Review what the previous \
         calls returned, then change approach: use different parameters, pick another \
         tool, or explain what is blocking progress."
    )
}
