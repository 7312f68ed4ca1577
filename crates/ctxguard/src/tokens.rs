//! Token estimation: the collaborator that measures message history.
//!
//! The compaction strategies never count tokens themselves. They hand a
//! flattened block sequence to a [`TokenCounter`] and trust its answer.
//! Two implementations ship with the crate:
//!
//! - [`CharRatioCounter`]: local, instant, character-ratio estimate.
//! - [`AnthropicTokenCounter`]: exact counts from the Anthropic
//!   `count_tokens` endpoint. Suspends on network I/O.

use crate::ContentBlock;
use crate::error::TokenCountError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Flat per-image estimate used by the local counter.
pub const DEFAULT_IMAGE_TOKENS: u64 = 1_000;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Future returned by [`TokenCounter::count_tokens`].
pub type CountFuture<'a> = BoxFuture<'a, Result<u64, TokenCountError>>;

/// Counts the tokens in a sequence of content blocks.
///
/// Errors propagate unchanged to whoever asked for the count; counters do
/// not retry.
pub trait TokenCounter: Send + Sync {
    fn count_tokens<'a>(&'a self, blocks: &'a [ContentBlock]) -> CountFuture<'a>;
}

impl<T: TokenCounter + ?Sized> TokenCounter for std::sync::Arc<T> {
    fn count_tokens<'a>(&'a self, blocks: &'a [ContentBlock]) -> CountFuture<'a> {
        (**self).count_tokens(blocks)
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for &T {
    fn count_tokens<'a>(&'a self, blocks: &'a [ContentBlock]) -> CountFuture<'a> {
        (**self).count_tokens(blocks)
    }
}

// ── Local estimate ─────────────────────────────────────────────────

/// Character-ratio estimator. Never fails.
#[derive(Debug, Clone)]
pub struct CharRatioCounter {
    chars_per_token: f64,
    image_tokens: u64,
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            image_tokens: DEFAULT_IMAGE_TOKENS,
        }
    }
}

impl CharRatioCounter {
    /// Create a counter with a calibrated chars-per-token ratio. Pass `None`
    /// to use the default.
    pub fn with_calibration(calibrated_cpt: Option<f64>) -> Self {
        Self {
            chars_per_token: calibrated_cpt
                .filter(|c| c.is_finite() && *c > 0.0)
                .unwrap_or(DEFAULT_CHARS_PER_TOKEN),
            ..Self::default()
        }
    }

    /// Override the flat per-image estimate.
    pub fn with_image_tokens(mut self, tokens: u64) -> Self {
        self.image_tokens = tokens;
        self
    }

    /// Synchronous estimate, for callers outside an async context.
    pub fn estimate(&self, blocks: &[ContentBlock]) -> u64 {
        let mut chars = 0usize;
        let mut images = 0u64;
        for block in blocks {
            match block {
                ContentBlock::Text { text } => chars += text.len(),
                ContentBlock::Image { .. } => images += 1,
            }
        }
        (chars as f64 / self.chars_per_token).ceil() as u64 + images * self.image_tokens
    }
}

impl TokenCounter for CharRatioCounter {
    fn count_tokens<'a>(&'a self, blocks: &'a [ContentBlock]) -> CountFuture<'a> {
        let tokens = self.estimate(blocks);
        trace!(blocks = blocks.len(), tokens, "local token estimate");
        Box::pin(async move { Ok(tokens) })
    }
}

// ── Remote count ───────────────────────────────────────────────────

#[derive(Serialize)]
struct CountRequest<'a> {
    model: &'a str,
    messages: [CountMessage<'a>; 1],
}

#[derive(Serialize)]
struct CountMessage<'a> {
    role: &'static str,
    content: &'a [ContentBlock],
}

#[derive(Deserialize)]
struct CountResponse {
    input_tokens: u64,
}

/// Exact token counts from the Anthropic messages `count_tokens` endpoint.
///
/// The whole block sequence is sent as a single user message, so the
/// result includes a few tokens of message framing.
#[derive(Debug, Clone)]
pub struct AnthropicTokenCounter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicTokenCounter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Point the counter at a different host (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages/count_tokens", self.base_url)
    }

    async fn request(&self, blocks: &[ContentBlock]) -> Result<u64, TokenCountError> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let body = CountRequest {
            model: &self.model,
            messages: [CountMessage {
                role: "user",
                content: blocks,
            }],
        };

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TokenCountError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CountResponse = resp
            .json()
            .await
            .map_err(|e| TokenCountError::Decode(e.to_string()))?;
        debug!(tokens = parsed.input_tokens, model = %self.model, "remote token count");
        Ok(parsed.input_tokens)
    }
}

impl TokenCounter for AnthropicTokenCounter {
    fn count_tokens<'a>(&'a self, blocks: &'a [ContentBlock]) -> CountFuture<'a> {
        Box::pin(self.request(blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_counter_uses_ratio() {
        let counter = CharRatioCounter::default();
        let blocks = vec![ContentBlock::text("a".repeat(35))];
        assert_eq!(counter.count_tokens(&blocks).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn local_counter_adds_flat_image_cost() {
        let counter = CharRatioCounter::default().with_image_tokens(50);
        let blocks = vec![
            ContentBlock::text("a".repeat(7)),
            ContentBlock::image("image/png", "x".repeat(10_000)),
        ];
        assert_eq!(counter.count_tokens(&blocks).await.unwrap(), 52);
    }

    #[test]
    fn calibration_ignores_nonsense_ratios() {
        let blocks = vec![ContentBlock::text("a".repeat(70))];
        let zero = CharRatioCounter::with_calibration(Some(0.0));
        let nan = CharRatioCounter::with_calibration(Some(f64::NAN));
        assert_eq!(zero.estimate(&blocks), 20);
        assert_eq!(nan.estimate(&blocks), 20);

        let calibrated = CharRatioCounter::with_calibration(Some(7.0));
        assert_eq!(calibrated.estimate(&blocks), 10);
    }

    #[test]
    fn count_request_matches_api_shape() {
        let blocks = vec![ContentBlock::text("hi")];
        let body = CountRequest {
            model: "claude-sonnet-4",
            messages: [CountMessage {
                role: "user",
                content: &blocks,
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let counter = AnthropicTokenCounter::new("key", "m").with_base_url("http://localhost:9/");
        assert_eq!(
            counter.endpoint(),
            "http://localhost:9/v1/messages/count_tokens"
        );
    }

    #[tokio::test]
    async fn remote_counter_skips_request_for_empty_input() {
        let counter = AnthropicTokenCounter::new("key", "m").with_base_url("http://127.0.0.1:1");
        assert_eq!(counter.count_tokens(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remote_counter_surfaces_connection_errors() {
        let counter = AnthropicTokenCounter::new("key", "m").with_base_url("http://127.0.0.1:1");
        let err = counter
            .count_tokens(&[ContentBlock::text("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, TokenCountError::Http(_)));
    }
}
