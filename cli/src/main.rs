//! ctxbudget CLI - inspect and select from saved conversation sessions.
//!
//! ```text
//! main() -> EngineConfig -> ContextEngine::load(session) -> command
//!                                                            |
//!                                 append | select | usage <--+
//! ```
//!
//! Results are printed to stdout as JSON. Logs go to stderr, filtered by
//! `RUST_LOG` (default `warn`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ctxbudget_config::EngineConfig;
use ctxbudget_context::policy::SpanReducer;
use ctxbudget_context::{
    CancellationToken, ContextEngine, ContextUsage, ContextUsageStatus, Selection, TokenEstimator,
    UsageSeverity,
};
use ctxbudget_types::{Budget, ItemBody, Role};

#[derive(Parser, Debug)]
#[command(name = "ctxbudget")]
#[command(about = "Budgeted context selection over conversation sessions")]
struct Args {
    /// Config file (defaults to ~/.ctxbudget/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one item to a session, creating it if missing
    Append {
        #[arg(long)]
        session: PathBuf,
        /// user, assistant, system, tool_result or compaction_summary
        #[arg(long, value_parser = parse_role)]
        role: Role,
        #[arg(long)]
        text: String,
        /// Mark the item as important for selective retention
        #[arg(long)]
        important: bool,
    },
    /// Run a policy and print the selected context
    Select {
        #[arg(long)]
        session: PathBuf,
        #[arg(long, value_enum, default_value = "truncation")]
        policy: PolicyArg,
        #[command(flatten)]
        budget: BudgetArgs,
        /// Print only the selection summary, not the item bodies
        #[arg(long)]
        summary_only: bool,
    },
    /// Report whether the whole session fits the budget
    Usage {
        #[arg(long)]
        session: PathBuf,
        #[command(flatten)]
        budget: BudgetArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Keep the N most recent unpinned items
    SlidingWindow,
    /// Drop the oldest unpinned items until the budget fits
    Truncation,
    /// Keep important items, then cap at the budget
    Selective,
    /// Substitute stored compaction records, then truncate
    Compaction,
    /// Head, omission placeholder, tail
    Hybrid,
}

/// Overrides for the configured budget.
#[derive(clap::Args, Debug, Default)]
struct BudgetArgs {
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    reserve: Option<u32>,
    #[arg(long)]
    pin_first: Option<usize>,
    #[arg(long)]
    pin_last: Option<usize>,
}

impl BudgetArgs {
    fn apply(&self, mut budget: Budget) -> Budget {
        if let Some(max_tokens) = self.max_tokens {
            budget.max_tokens = max_tokens;
        }
        if let Some(reserve) = self.reserve {
            budget.reserve_for_output = reserve;
        }
        if let Some(pin_first) = self.pin_first {
            budget.pin_first_n = pin_first;
        }
        if let Some(pin_last) = self.pin_last {
            budget.pin_last_n = pin_last;
        }
        budget
    }
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("unknown role: {raw}"))
}

#[derive(Serialize)]
struct SelectOutput<'a> {
    policy: &'static str,
    usage: String,
    selection: &'a Selection,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<ItemBody>>,
}

#[derive(Serialize)]
struct UsageOutput {
    status: &'static str,
    usage: ContextUsage,
    severity: UsageSeverity,
    display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pinned_tokens: Option<u32>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries JSON output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load_from(path)?),
        None => Ok(EngineConfig::load().unwrap_or_default()),
    }
}

fn build_estimator(config: &EngineConfig) -> Result<TokenEstimator> {
    // The exact strategy defaults to the built-in tiktoken tokenizer.
    Ok(TokenEstimator::from_settings(&config.estimator, None)?)
}

fn open_session(path: &Path, config: &EngineConfig, create: bool) -> Result<ContextEngine> {
    let estimator = build_estimator(config)?;
    if create && !path.exists() {
        tracing::info!(path = %path.display(), "Starting new session");
        return Ok(ContextEngine::new(estimator, config.policy));
    }
    ContextEngine::load(path, estimator, config.policy)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

fn run_select(
    engine: &mut ContextEngine,
    policy: PolicyArg,
    budget: &Budget,
    summary_only: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let (name, selection) = match policy {
        PolicyArg::SlidingWindow => ("sliding_window", engine.sliding_window(budget)),
        PolicyArg::Truncation => ("truncation", engine.truncate(budget)?),
        PolicyArg::Selective => {
            let kept = engine.selective_default(budget);
            ("selective", engine.enforce_budget(kept, budget)?)
        }
        PolicyArg::Compaction => ("compaction", engine.select_with_compaction(budget)?),
        PolicyArg::Hybrid => ("hybrid", engine.hybrid(budget, SpanReducer::Omit, &cancel)?),
    };

    if let Some(fallback) = selection.fallback() {
        tracing::info!(?fallback, policy = name, "Policy fell back");
    }

    let output = SelectOutput {
        policy: name,
        usage: selection.usage().format_compact(),
        selection: &selection,
        items: (!summary_only).then(|| selection.materialize(engine.log())),
    };
    print_json(&output)
}

fn run_usage(engine: &ContextEngine, budget: &Budget) -> Result<()> {
    let output = match engine.usage(budget) {
        ContextUsageStatus::Ready(usage) => UsageOutput {
            status: "ready",
            usage,
            severity: usage.severity(),
            display: usage.format_compact(),
            pinned_tokens: None,
        },
        ContextUsageStatus::NeedsReduction { usage } => UsageOutput {
            status: "needs_reduction",
            usage,
            severity: usage.severity(),
            display: usage.format_compact(),
            pinned_tokens: None,
        },
        ContextUsageStatus::PinnedTooLarge {
            usage,
            required_tokens,
            ..
        } => UsageOutput {
            status: "pinned_too_large",
            usage,
            severity: usage.severity(),
            display: usage.format_compact(),
            pinned_tokens: Some(required_tokens),
        },
    };
    print_json(&output)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Append {
            session,
            role,
            text,
            important,
        } => {
            if text.is_empty() {
                bail!("refusing to append an empty item");
            }
            let mut engine = open_session(&session, &config, true)?;
            let body = ItemBody::text(role, text);
            let body = if important { body.important() } else { body };
            let id = engine.append(body);
            engine
                .save(&session)
                .with_context(|| format!("failed to save session {}", session.display()))?;
            print_json(&serde_json::json!({ "id": id }))
        }
        Command::Select {
            session,
            policy,
            budget,
            summary_only,
        } => {
            let mut engine = open_session(&session, &config, false)?;
            let budget = budget.apply(config.budget);
            run_select(&mut engine, policy, &budget, summary_only)
        }
        Command::Usage { session, budget } => {
            let engine = open_session(&session, &config, false)?;
            let budget = budget.apply(config.budget);
            run_usage(&engine, &budget)
        }
    }
}
