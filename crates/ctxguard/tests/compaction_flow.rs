//! End-to-end compaction over recorded conversations.
//!
//! Conversations are written to temp files and loaded the way the CLI
//! loads them, then driven through the per-turn context policy.

use std::io::Write;
use std::sync::{Arc, Mutex};

use ctxguard::context::CONDENSED_PLACEHOLDER;
use ctxguard::prelude::*;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Helpers ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    truncations: Mutex<Vec<String>>,
    condensations: Mutex<Vec<(CondenseKind, bool)>>,
}

impl TelemetrySink for Recorder {
    fn record_truncation(&self, task_id: &str) {
        self.truncations.lock().unwrap().push(task_id.to_string());
    }

    fn record_condensation(&self, _task_id: &str, kind: CondenseKind, is_automatic: bool) {
        self.condensations.lock().unwrap().push((kind, is_automatic));
    }
}

/// Answers every request with the same summary, remembering the requests.
struct FixedSummary {
    text: &'static str,
    seen: Mutex<Vec<SummaryRequest>>,
}

impl FixedSummary {
    fn new(text: &'static str) -> Self {
        Self {
            text,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl SummaryProvider for FixedSummary {
    fn summarize<'a>(
        &'a self,
        request: &'a SummaryRequest,
    ) -> BoxFuture<'a, Result<SummaryResponse, SummaryError>> {
        self.seen.lock().unwrap().push(request.clone());
        Box::pin(async move {
            Ok(SummaryResponse {
                text: self.text.to_string(),
                cost: 0.003,
            })
        })
    }
}

/// A debugging session: a task, then rounds of reading files.
fn recorded_session(rounds: usize) -> serde_json::Value {
    let mut messages = vec![json!({ "role": "user", "content": "Fix the failing parser test" })];
    for i in 0..rounds {
        messages.push(json!({
            "role": "assistant",
            "content": [{ "type": "text", "text": format!("Reading module {i}.") }]
        }));
        messages.push(json!({
            "role": "user",
            "content": [
                { "type": "text", "text": format!("[read_file for 'src/mod{i}.rs'] Result:") },
                { "type": "text", "text": "fn parse() {}\n".repeat(300) },
                { "type": "text", "text": "<environment_details>cwd: /repo</environment_details>" }
            ]
        }));
    }
    serde_json::Value::Array(messages)
}

fn write_json(value: &serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{value}").unwrap();
    file
}

fn small_window() -> ContextConfig {
    ContextConfig::new(100_000)
        .with_max_output_tokens(10_000)
        .with_condense_threshold(50.0)
}

// ── Structural condensation ──────────────────────────────────────────

#[tokio::test]
async fn loaded_session_condenses_and_stays_condensed() {
    let file = write_json(&recorded_session(5));
    let messages = load_conversation(file.path()).unwrap();
    assert_eq!(messages.len(), 11);

    let telemetry = Arc::new(Recorder::default());
    let manager = ContextManager::new(small_window(), CharRatioCounter::default())
        .with_telemetry(telemetry.clone());

    let outcome = manager
        .manage(&messages, ManageRequest::new(70_000, "session-1"))
        .await
        .unwrap();
    let ManageOutcome::Condensed(first) = outcome else {
        panic!("expected condensation");
    };
    assert!(matches!(
        first,
        Compacted::Structural {
            condensed_results: 5,
            ..
        }
    ));

    // Header kept; the body and the block after it collapse into one placeholder.
    let MessageContent::Blocks(blocks) = &first.messages()[2].content else {
        panic!("expected blocks");
    };
    let texts: Vec<_> = blocks.iter().filter_map(ContentBlock::as_text).collect();
    assert_eq!(
        texts,
        ["[read_file for 'src/mod0.rs'] Result:", CONDENSED_PLACEHOLDER]
    );

    // Nothing left to condense and still within budget: history stays as is.
    let condensed = first.into_messages();
    let again = manager
        .manage(&condensed, ManageRequest::new(70_000, "session-1"))
        .await
        .unwrap();
    assert!(again.is_unchanged());

    let second = manager
        .condense_now(&condensed, "session-1", 70_000)
        .await
        .unwrap();
    assert!(second.is_noop());
    assert_eq!(second.messages(), condensed.as_slice());

    let events = telemetry.condensations.lock().unwrap();
    assert_eq!(events.as_slice(), [(CondenseKind::Structural, true)]);
}

#[tokio::test]
async fn over_budget_history_without_tool_results_is_truncated() {
    let mut messages = vec![Message::user("Plan the migration")];
    for i in 0..10 {
        messages.push(Message::assistant_text(format!("Step {i}: {}", "a".repeat(1_000))));
        messages.push(Message::user(format!("Continue {i}")));
    }

    let telemetry = Arc::new(Recorder::default());
    let manager = ContextManager::new(small_window(), CharRatioCounter::default())
        .with_telemetry(telemetry.clone());

    // Over the threshold and over the 80k allowed tokens, with nothing to condense.
    let outcome = manager
        .manage(&messages, ManageRequest::new(95_000, "session-7"))
        .await
        .unwrap();
    let ManageOutcome::Truncated { removed, .. } = &outcome else {
        panic!("expected truncation");
    };
    assert_eq!(*removed, 10);

    let kept = outcome.into_messages(messages.clone());
    assert_eq!(kept.len(), 11);
    assert_eq!(kept[0], messages[0]);
    assert!(telemetry.condensations.lock().unwrap().is_empty());
    assert_eq!(telemetry.truncations.lock().unwrap().as_slice(), ["session-7"]);
}

#[tokio::test]
async fn condensed_history_is_smaller_by_measurement() {
    let file = write_json(&recorded_session(4));
    let messages = load_conversation(file.path()).unwrap();
    let counter = CharRatioCounter::default();
    let before = counter
        .count_tokens(&flatten_for_counting(&messages))
        .await
        .unwrap();

    let manager = ContextManager::new(small_window(), counter);
    let compacted = manager
        .condense_now(&messages, "session-2", before)
        .await
        .unwrap();
    assert!(compacted.new_context_tokens() < before / 10);
    assert_eq!(compacted.cost(), 0.0);
    assert!(compacted.summary().is_none());
}

// ── Truncation fallback ──────────────────────────────────────────────

#[tokio::test]
async fn over_budget_without_condense_truncates_pairs() {
    let file = write_json(&recorded_session(10));
    let messages = load_conversation(file.path()).unwrap();
    assert_eq!(messages.len(), 21);

    let telemetry = Arc::new(Recorder::default());
    let manager = ContextManager::new(
        small_window().without_condense(),
        CharRatioCounter::default(),
    )
    .with_telemetry(telemetry.clone());

    let outcome = manager
        .manage(&messages, ManageRequest::new(85_000, "session-3"))
        .await
        .unwrap();
    let ManageOutcome::Truncated {
        messages: kept,
        removed,
    } = outcome
    else {
        panic!("expected truncation");
    };

    assert_eq!(removed, 10);
    assert_eq!(kept.len(), 11);
    assert_eq!(kept[0], messages[0]);
    assert_eq!(kept[1], messages[11]);
    assert_eq!(kept[1].role, MessageRole::Assistant);
    assert_eq!(telemetry.truncations.lock().unwrap().as_slice(), ["session-3"]);
}

// ── Summarization ────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_summaries_merge_instead_of_stacking() {
    let provider = Arc::new(FixedSummary::new("Read modules 0-3; parser bug is in mod2."));
    let manager = ContextManager::new(
        small_window().with_condense_strategy(CondenseStrategy::Summarize),
        CharRatioCounter::default(),
    )
    .with_summarizer(provider.clone());

    let file = write_json(&recorded_session(4));
    let messages = load_conversation(file.path()).unwrap();

    let first = manager
        .manage(&messages, ManageRequest::new(70_000, "session-4"))
        .await
        .unwrap()
        .into_messages(messages.clone());
    assert_eq!(first.len(), 5);
    assert_eq!(first[0], messages[0]);
    assert!(first[1].is_summary);
    assert_eq!(&first[2..], &messages[6..]);

    let mut next = first.clone();
    for i in 0..2 {
        next.push(Message::assistant_text(format!("Editing mod{i}.")));
        next.push(Message::user(format!("Edit {i} applied.")));
    }

    let second = manager
        .manage(&next, ManageRequest::new(70_000, "session-4"))
        .await
        .unwrap()
        .into_messages(next.clone());
    assert_eq!(second.iter().filter(|m| m.is_summary).count(), 1);
    assert_eq!(&second[2..], &next[6..]);

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(!seen[0].transcript.contains("EXISTING SUMMARY"));
    assert!(seen[1].transcript.starts_with("=== EXISTING SUMMARY ===\nRead modules 0-3"));
}

#[tokio::test]
async fn condensing_provider_and_custom_prompt_are_used() {
    let main = Arc::new(FixedSummary::new("main"));
    let cheap = Arc::new(FixedSummary::new("cheap"));
    let mut config = small_window().with_condense_strategy(CondenseStrategy::Summarize);
    config.condense.config.custom_prompt = Some("List files touched.".into());

    let manager = ContextManager::new(config, CharRatioCounter::default())
        .with_summarizer(main.clone())
        .with_condensing_provider(cheap.clone());

    let messages = load_conversation(write_json(&recorded_session(3)).path()).unwrap();
    let compacted = manager
        .condense_now(&messages, "session-5", u64::MAX)
        .await
        .unwrap();

    assert_eq!(compacted.summary(), Some("cheap"));
    assert!(main.seen.lock().unwrap().is_empty());
    assert_eq!(cheap.seen.lock().unwrap()[0].instructions, "List files touched.");
}

// ── Configuration ────────────────────────────────────────────────────

#[tokio::test]
async fn profile_threshold_from_config_file() {
    let config_file = write_json(&json!({
        "context_window": 100000,
        "max_output_tokens": 10000,
        "condense": { "config": { "threshold_percent": 90 } },
        "profile_thresholds": { "cheap": 10, "same": -1 }
    }));
    let config = ContextConfig::from_json_file(config_file.path()).unwrap();
    let manager = ContextManager::new(config, CharRatioCounter::default());
    let messages = load_conversation(write_json(&recorded_session(2)).path()).unwrap();

    let default_profile = manager
        .manage(&messages, ManageRequest::new(20_000, "t").with_profile("same"))
        .await
        .unwrap();
    assert!(default_profile.is_unchanged());

    let cheap = manager
        .manage(&messages, ManageRequest::new(20_000, "t").with_profile("cheap"))
        .await
        .unwrap();
    assert!(matches!(cheap, ManageOutcome::Condensed(_)));
}

#[test]
fn malformed_conversation_reports_path() {
    let file = write_json(&json!({ "not": "a list" }));
    let err = load_conversation(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

// ── Remote counting ──────────────────────────────────────────────────

/// Read one HTTP request (headers plus `content-length` body).
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
        if let Some((headers, body)) = text.split_once("\r\n\r\n") {
            let expected = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if body.len() >= expected {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve a single `count_tokens` response and return the raw request.
async fn spawn_count_server(tokens: u64) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let body = format!(r#"{{"input_tokens":{tokens}}}"#);
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });
    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn anthropic_counter_measures_condensed_history() {
    let (base, server) = spawn_count_server(1234).await;
    let counter = AnthropicTokenCounter::new("test-key", "claude-test").with_base_url(base);
    let manager = ContextManager::new(small_window(), counter);
    let messages = load_conversation(write_json(&recorded_session(2)).path()).unwrap();

    let compacted = manager
        .condense_now(&messages, "session-6", 50_000)
        .await
        .unwrap();
    assert_eq!(compacted.new_context_tokens(), 1234);

    let request = server.await.unwrap();
    let lower = request.to_ascii_lowercase();
    assert!(lower.starts_with("post /v1/messages/count_tokens "));
    assert!(lower.contains("x-api-key: test-key"));
    assert!(lower.contains("anthropic-version: 2023-06-01"));
    assert!(request.contains(CONDENSED_PLACEHOLDER));
    assert!(request.contains("\"model\":\"claude-test\""));
}
