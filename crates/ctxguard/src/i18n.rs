//! Localized user-facing strings.
//!
//! Only the repetition detector's ask-user escalation is user-facing in
//! this crate. Lookups that fail fall back to the untranslated key so a
//! missing catalog entry degrades to something readable instead of an error.

use std::collections::HashMap;

/// Key for the message shown when the agent keeps repeating one tool call.
pub const REPETITION_LIMIT_REACHED: &str = "tools.repetition_limit_reached";

/// Resolves message keys to display strings.
pub trait Localizer: Send + Sync {
    /// Return the localized string for `key` with `{name}` placeholders
    /// filled from `params`, or `None` if the key is unknown.
    fn localize(&self, key: &str, params: &[(&str, &str)]) -> Option<String>;
}

/// Localize `key`, falling back to the key itself.
pub fn localize_or_key(localizer: &dyn Localizer, key: &str, params: &[(&str, &str)]) -> String {
    localizer
        .localize(key, params)
        .unwrap_or_else(|| key.to_string())
}

/// In-memory catalog of templates.
#[derive(Debug, Clone, Default)]
pub struct StaticLocalizer {
    catalog: HashMap<String, String>,
}

impl StaticLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in English catalog.
    pub fn english() -> Self {
        Self::new().with_entry(
            REPETITION_LIMIT_REACHED,
            "The assistant keeps repeating the same action ({tool_name}) without making \
             progress. Please give it more guidance or rephrase the task.",
        )
    }

    /// Add or replace a template.
    pub fn with_entry(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.catalog.insert(key.into(), template.into());
        self
    }
}

impl Localizer for StaticLocalizer {
    fn localize(&self, key: &str, params: &[(&str, &str)]) -> Option<String> {
        let template = self.catalog.get(key)?;
        let mut out = template.clone();
        for (name, value) in params {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        Some(out)
    }
}
