//! Command-line front end for `ctxguard`.
//!
//! Runs the context policy and the repetition detector over recorded
//! sessions, for tuning thresholds offline. Conversations are JSON arrays of
//! messages; tool-call logs are JSON lines of `{"name": .., "params": {..}}`.
//! Results go to stdout as JSON, logs to stderr.
//!
//! # Examples
//!
//! ```sh
//! # Would a 150k-token history be compacted on a 200k window?
//! ctxguard usage --tokens 150000
//!
//! # Run one turn of the policy over a recorded conversation
//! ctxguard --config ctxguard.json manage --conversation session.json
//!
//! # Count with the Anthropic API instead of the local estimate
//! ANTHROPIC_API_KEY=... ctxguard condense --conversation session.json \
//!     --anthropic-model claude-sonnet-4-20250514
//!
//! # Replay a tool-call log through the repetition detector
//! ctxguard replay --calls calls.jsonl
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ctxguard::prelude::*;
use serde_json::json;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Context-budget and loop-safety checks for recorded agent sessions.
#[derive(Parser)]
#[command(name = "ctxguard", version)]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report context usage against the threshold for a token total.
    Usage {
        /// Tokens currently in history.
        #[arg(long)]
        tokens: u64,

        /// API profile, for per-profile threshold overrides.
        #[arg(long)]
        profile: Option<String>,
    },

    /// Drop the oldest messages after the first.
    Truncate {
        #[arg(long)]
        conversation: PathBuf,

        /// Fraction of history to remove. Defaults to the configured value.
        #[arg(long)]
        fraction: Option<f64>,

        #[arg(long, default_value = "cli")]
        task_id: String,
    },

    /// Run the configured compaction strategy unconditionally.
    Condense {
        #[arg(long)]
        conversation: PathBuf,

        #[arg(long, default_value = "cli")]
        task_id: String,

        /// Count tokens with the Anthropic API using this model.
        #[arg(long)]
        anthropic_model: Option<String>,
    },

    /// Run one turn of the context policy.
    Manage {
        #[arg(long)]
        conversation: PathBuf,

        /// Measured token total. Counted from the conversation when omitted.
        #[arg(long)]
        tokens: Option<u64>,

        #[arg(long)]
        profile: Option<String>,

        #[arg(long, default_value = "cli")]
        task_id: String,

        #[arg(long)]
        anthropic_model: Option<String>,
    },

    /// Feed a JSON-lines tool-call log through the repetition detector.
    Replay {
        #[arg(long)]
        calls: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(level),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => ContextConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => ContextConfig::default(),
    };

    match cli.command {
        Command::Usage { tokens, profile } => {
            let manager = ContextManager::new(config.clone(), CharRatioCounter::default());
            let usage = manager.usage(tokens, profile.as_deref());
            eprintln!("{}", usage.to_log_string());
            print_json(&json!({
                "total_tokens": usage.total_tokens,
                "available_tokens": usage.available_tokens,
                "used_percent": usage.used_percent,
                "threshold_percent": usage.threshold_percent,
                "should_compact": usage.exceeds_threshold(),
                "allowed_tokens": ctxguard::context::threshold::allowed_tokens(
                    config.context_window,
                    config.max_output_tokens,
                ),
            }))
        }

        Command::Truncate {
            conversation,
            fraction,
            task_id,
        } => {
            let messages = load(&conversation)?;
            let fraction = fraction.unwrap_or(config.truncation_fraction);
            if !(0.0..=1.0).contains(&fraction) {
                return Err(format!("--fraction must be within [0, 1], got {fraction}"));
            }
            let kept = truncate_conversation(&messages, fraction, &task_id, &TracingTelemetry);
            eprintln!("kept {} of {} messages", kept.len(), messages.len());
            print_json(&kept)
        }

        Command::Condense {
            conversation,
            task_id,
            anthropic_model,
        } => {
            let messages = load(&conversation)?;
            let counter = build_counter(anthropic_model.as_deref())?;
            let prev = count(counter.as_ref(), &messages).await?;
            let manager = ContextManager::new(config, counter).with_telemetry(TracingTelemetry);

            let compacted = manager
                .condense_now(&messages, &task_id, prev)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!(
                "{}: {prev} -> {} tokens",
                compacted.kind(),
                compacted.new_context_tokens()
            );
            print_json(compacted.messages())
        }

        Command::Manage {
            conversation,
            tokens,
            profile,
            task_id,
            anthropic_model,
        } => {
            let messages = load(&conversation)?;
            let counter = build_counter(anthropic_model.as_deref())?;
            let total = match tokens {
                Some(t) => t,
                None => count(counter.as_ref(), &messages).await?,
            };
            let manager = ContextManager::new(config, counter).with_telemetry(TracingTelemetry);

            let mut request = ManageRequest::new(total, &task_id);
            if let Some(profile) = profile.as_deref() {
                request = request.with_profile(profile);
            }
            let outcome = manager
                .manage(&messages, request)
                .await
                .map_err(|e| e.to_string())?;
            let action = match &outcome {
                ManageOutcome::Unchanged => "unchanged".to_string(),
                ManageOutcome::Condensed(c) => format!("condensed ({})", c.kind()),
                ManageOutcome::Truncated { removed, .. } => {
                    format!("truncated ({removed} removed)")
                }
            };
            eprintln!("{action}");
            print_json(&outcome.into_messages(messages))
        }

        Command::Replay { calls } => replay(&calls, &config),
    }
}

fn replay(path: &Path, config: &ContextConfig) -> Result<(), String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let mut detector = RepetitionDetector::from_config(&config.repetition);
    let mut blocked = 0usize;

    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let invocation: ToolInvocation<serde_json::Value> = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: {e}", path.display(), i + 1))?;
        let check = detector.check(&invocation);
        if !check.is_allowed() {
            blocked += 1;
        }
        let record = json!({ "line": i + 1, "tool": invocation.name, "check": check });
        println!("{record}");
    }

    eprintln!("{blocked} call(s) blocked");
    Ok(())
}

fn load(path: &Path) -> Result<Vec<Message>, String> {
    load_conversation(path).map_err(|e| e.to_string())
}

fn build_counter(anthropic_model: Option<&str>) -> Result<Arc<dyn TokenCounter>, String> {
    let Some(model) = anthropic_model else {
        return Ok(Arc::new(CharRatioCounter::default()));
    };
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| "ANTHROPIC_API_KEY environment variable is not set".to_string())?;
    Ok(Arc::new(AnthropicTokenCounter::new(api_key, model)))
}

async fn count(counter: &dyn TokenCounter, messages: &[Message]) -> Result<u64, String> {
    counter
        .count_tokens(&flatten_for_counting(messages))
        .await
        .map_err(|e| format!("token counting failed: {e}"))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{out}");
    Ok(())
}
