//! Configuration for the [`ContextManager`](crate::context::manager::ContextManager)
//! and the [`RepetitionDetector`](crate::tools::repetition::RepetitionDetector).
//!
//! Every field has a default, so an empty JSON object is a valid config.
//!
//! # Examples
//!
//! Builder methods for the common settings:
//!
//! ```
//! use ctxguard::config::ContextConfig;
//!
//! let config = ContextConfig::new(200_000)
//!     .with_max_output_tokens(16_384)
//!     .with_condense_threshold(75.0)
//!     .with_repetition_limit(4);
//! assert!(config.validate().is_ok());
//! ```
//!
//! From a JSON file:
//!
//! ```json
//! {
//!   "context_window": 128000,
//!   "condense": { "enabled": true, "config": { "threshold_percent": 80 } },
//!   "profile_thresholds": { "cheap-model": 60, "inherits": -1 }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::condense::ToolAllowList;
use crate::context::threshold::MAX_CONDENSE_THRESHOLD;
use crate::error::ConfigError;
use crate::tools::names::{BROWSER_ACTION, HIGH_VOLUME_TOOLS};

/// Fraction of history dropped by the fallback truncation.
pub const DEFAULT_TRUNCATION_FRACTION: f64 = 0.5;

/// Consecutive identical tool calls allowed before the detector blocks.
pub const DEFAULT_REPETITION_LIMIT: u32 = 3;

/// Profile threshold value meaning "use the global threshold".
pub const INHERIT_THRESHOLD: f64 = -1.0;

const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for module configurations.
///
/// When `enabled` is `false`, the module is skipped regardless of the
/// inner config values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle<T: Default> {
    /// Whether this module is active.
    pub enabled: bool,
    /// Module-specific configuration.
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Condensation ──────────────────────────────────────────────────

/// Which compaction strategy runs when the threshold is crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondenseStrategy {
    /// Replace high-volume tool results with placeholders. No LLM call.
    #[default]
    Structural,
    /// Replace the middle of history with an LLM-written summary.
    Summarize,
}

/// Settings for automatic condensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondenseConfig {
    /// Percent of available tokens at which condensation triggers.
    /// Clamped to `[5, 100]` at use.
    pub threshold_percent: f64,
    pub strategy: CondenseStrategy,
    /// Tools whose results structural condensation may remove.
    pub tools: Vec<String>,
    /// Replacement summarization instructions.
    pub custom_prompt: Option<String>,
}

impl Default for CondenseConfig {
    fn default() -> Self {
        Self {
            threshold_percent: MAX_CONDENSE_THRESHOLD,
            strategy: CondenseStrategy::default(),
            tools: HIGH_VOLUME_TOOLS.iter().map(|t| t.to_string()).collect(),
            custom_prompt: None,
        }
    }
}

impl CondenseConfig {
    pub fn allow_list(&self) -> ToolAllowList {
        self.tools.iter().cloned().collect()
    }
}

// ── Repetition ────────────────────────────────────────────────────

/// Calls that legitimately repeat and must never be blocked: `tool` with
/// parameter `param` set to one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionExemption {
    pub tool: String,
    pub param: String,
    pub values: Vec<String>,
}

impl RepetitionExemption {
    pub fn new(tool: impl Into<String>, param: impl Into<String>, values: &[&str]) -> Self {
        Self {
            tool: tool.into(),
            param: param.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Scrolling a page repeats the same call by nature.
    pub fn browser_scroll() -> Self {
        Self::new(BROWSER_ACTION, "action", &["scroll_down", "scroll_up"])
    }
}

/// Settings for the repetition detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepetitionConfig {
    /// Consecutive identical calls before blocking. `0` disables detection.
    pub limit: u32,
    pub exemptions: Vec<RepetitionExemption>,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_REPETITION_LIMIT,
            exemptions: vec![RepetitionExemption::browser_scroll()],
        }
    }
}

// ── Top-level config ──────────────────────────────────────────────

/// Configuration for context management and loop safety.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Model context window in tokens.
    pub context_window: u64,
    /// Tokens reserved for the reply. `None` uses the 8192-token default.
    pub max_output_tokens: Option<u64>,
    pub condense: Toggle<CondenseConfig>,
    /// Per-profile threshold overrides. `-1` inherits the global threshold.
    pub profile_thresholds: HashMap<String, f64>,
    /// Fraction of history the fallback truncation removes.
    pub truncation_fraction: f64,
    pub repetition: RepetitionConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            max_output_tokens: None,
            condense: Toggle::default(),
            profile_thresholds: HashMap::new(),
            truncation_fraction: DEFAULT_TRUNCATION_FRACTION,
            repetition: RepetitionConfig::default(),
        }
    }
}

impl ContextConfig {
    pub fn new(context_window: u64) -> Self {
        Self {
            context_window,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_condense_threshold(mut self, percent: f64) -> Self {
        self.condense.config.threshold_percent = percent;
        self
    }

    pub fn with_condense_strategy(mut self, strategy: CondenseStrategy) -> Self {
        self.condense.config.strategy = strategy;
        self
    }

    pub fn without_condense(mut self) -> Self {
        self.condense.enabled = false;
        self
    }

    pub fn with_profile_threshold(mut self, profile: impl Into<String>, percent: f64) -> Self {
        self.profile_thresholds.insert(profile.into(), percent);
        self
    }

    pub fn with_truncation_fraction(mut self, fraction: f64) -> Self {
        self.truncation_fraction = fraction;
        self
    }

    pub fn with_repetition_limit(mut self, limit: u32) -> Self {
        self.repetition.limit = limit;
        self
    }

    /// Check the preconditions other modules rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.truncation_fraction) {
            return Err(ConfigError::InvalidFraction(self.truncation_fraction));
        }
        if let Some(empty) = self
            .repetition
            .exemptions
            .iter()
            .find(|e| e.values.is_empty())
        {
            return Err(ConfigError::EmptyExemption(empty.tool.clone()));
        }
        Ok(())
    }
}
