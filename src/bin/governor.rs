//! Token Governor CLI
//!
//! Command-line shell over the scheduling, budget and context engines.
//! Designed for use by agent skills and hooks: every command prints JSON on
//! stdout; logs go to stderr (`RUST_LOG`).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use governor_lib::budget::{BudgetPolicy, BudgetState, PauseRecord, UsageSample};
use governor_lib::schedule::ScheduledCheck;
use governor_lib::{
    apply_schedule, classify_complexity, compute_check_schedule, compute_optimization_actions,
    count_tokens, get_allowed_files, spending_velocity_at, total_token_savings, validate_config,
    CheckState, CheckStatus, ClassificationSignals, ComplexityLevel, ConfigLoadError, Decision,
    GovernorConfig, ModelTier, OptimizationAction, StateStore,
};

#[derive(Parser)]
#[command(name = "governor")]
#[command(about = "Token Governor - adaptive check scheduling and token budgets", long_about = None)]
struct Cli {
    /// Config file (default: <data dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// State directory (default: $TOKEN_GOVERNOR_HOME or the platform data dir)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Decide which checks should run now
    Schedule {
        /// Agent is busy with user work
        #[arg(long)]
        busy: bool,
        /// Evaluation time (RFC 3339, default: now)
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
        /// Persist the resulting check states
        #[arg(long)]
        commit: bool,
    },
    /// Check state commands
    Check {
        #[command(subcommand)]
        action: CheckAction,
    },
    /// Budget governance commands
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },
    /// Context classification commands
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
    /// Token counting commands
    Tokens {
        #[command(subcommand)]
        action: TokensAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and list every violation
    Validate,
    /// Print the effective configuration
    Show,
}

#[derive(Subcommand)]
enum CheckAction {
    /// Record that a check ran and how it went
    Record {
        /// Check ID from the catalog
        check_id: String,
        #[arg(long, default_value = "ok")]
        status: CheckStatus,
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum BudgetAction {
    /// Evaluate the budget and list the actions to take
    Evaluate {
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
        /// Apply the actions to the persisted budget state
        #[arg(long)]
        commit: bool,
    },
    /// Record token usage since the previous sample
    RecordUsage {
        #[arg(long)]
        tokens: u64,
        #[arg(long, default_value = "1")]
        requests: u32,
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
    },
    /// Pin the operating tier, or clear the pin
    Pin {
        /// Tier to pin (economy|balanced|premium)
        #[arg(required_unless_present = "clear")]
        tier: Option<ModelTier>,
        #[arg(long, conflicts_with = "tier")]
        clear: bool,
    },
    /// Show the current budget state
    Status {
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Classify a task and list the context files it may load
    Classify {
        /// Task text (or - to read from stdin)
        task: String,
        /// Force a complexity level
        #[arg(long)]
        level: Option<ComplexityLevel>,
        /// Extra keywords to score
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TokensAction {
    /// Count tokens in text
    Count {
        /// Text to count (or - to read from stdin)
        text: String,
    },
}

fn parse_time(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time {:?}: {}", raw, e))
}

// ============ Output Types ============

#[derive(Serialize)]
struct ScheduleRow {
    id: String,
    critical: bool,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Serialize)]
struct ScheduleOutput {
    now: DateTime<Utc>,
    busy: bool,
    tier: ModelTier,
    interval_scale: f64,
    checks: Vec<ScheduleRow>,
    tokens_saved: u64,
    committed: bool,
}

#[derive(Serialize)]
struct BudgetStatusOutput {
    spent: u64,
    limit: u64,
    remaining: u64,
    usage_pct: f64,
    tier: ModelTier,
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manual_tier: Option<ModelTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paused: Option<PauseRecord>,
    velocity: f64,
    period_end: DateTime<Utc>,
    samples: usize,
}

#[derive(Serialize)]
struct EvaluateOutput<'a> {
    actions: &'a [OptimizationAction],
    current_tier: ModelTier,
    new_tier: ModelTier,
    projected_spend: f64,
    velocity: f64,
    remaining: u64,
    committed: bool,
}

#[derive(Serialize)]
struct ClassifyOutput {
    level: ComplexityLevel,
    token_count: u32,
    scores: Vec<(ComplexityLevel, u32)>,
    files: Vec<String>,
}

#[derive(Serialize)]
struct TokenCountOutput {
    tokens: u32,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let env = Env {
        config_path: cli.config,
        state_dir: cli.state_dir,
    };

    let result = match cli.command {
        Commands::Config { action } => handle_config(&env, action),
        Commands::Schedule { busy, now, commit } => handle_schedule(&env, busy, now, commit),
        Commands::Check { action } => handle_check(&env, action),
        Commands::Budget { action } => handle_budget(&env, action),
        Commands::Context { action } => handle_context(&env, action),
        Commands::Tokens { action } => handle_tokens(action),
    };

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput {
                error: format!("{:#}", e),
            };
            match serde_json::to_string(&error) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{{\"error\":\"{}\"}}", e.to_string().replace('"', "'")),
            }
            std::process::exit(1);
        }
    }
}

/// Paths resolved from global flags
struct Env {
    config_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

impl Env {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => match &self.state_dir {
                Some(dir) => Ok(dir.join(governor_lib::config::CONFIG_FILE_NAME)),
                None => Ok(GovernorConfig::default_path()?),
            },
        }
    }

    fn load_config(&self) -> Result<GovernorConfig> {
        let path = self.config_path()?;
        GovernorConfig::load_or_default(&path)
            .with_context(|| format!("loading config {}", path.display()))
    }

    fn store(&self) -> Result<StateStore> {
        let store = match &self.state_dir {
            Some(dir) => StateStore::open(dir.clone())?,
            None => StateStore::open_default()?,
        };
        Ok(store)
    }
}

fn now_or(now: Option<DateTime<Utc>>) -> DateTime<Utc> {
    now.unwrap_or_else(Utc::now)
}

// ============ Handlers ============

fn handle_config(env: &Env, action: ConfigAction) -> Result<String> {
    let path = env.config_path()?;
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("config already exists at {} (use --force)", path.display());
            }
            GovernorConfig::default().save(&path)?;
            Ok(serde_json::json!({ "written": path }).to_string())
        }
        ConfigAction::Validate => {
            let config = match GovernorConfig::load_or_default(&path) {
                Ok(config) => config,
                Err(ConfigLoadError::Invalid(err)) => {
                    return Ok(serde_json::json!({ "valid": false, "violations": err.violations }).to_string());
                }
                Err(e) => return Err(e.into()),
            };
            validate_config(&config)?;
            Ok(serde_json::json!({ "valid": true, "violations": [] }).to_string())
        }
        ConfigAction::Show => {
            let config = env.load_config()?;
            Ok(serde_json::to_string_pretty(&config)?)
        }
    }
}

fn handle_schedule(
    env: &Env,
    busy: bool,
    now: Option<DateTime<Utc>>,
    commit: bool,
) -> Result<String> {
    let config = env.load_config()?;
    let store = env.store()?;
    let now = now_or(now);

    let budget = store.load_budget(&config.budget)?;
    let interval_scale = config.budget.tier_catalog.interval_scale(budget.current_tier);
    let scheduler = config.scheduler.scaled(interval_scale);

    let states = store.load_checks()?;
    let schedule: Vec<ScheduledCheck> = compute_check_schedule(&states, &scheduler, now, busy);
    let next = apply_schedule(&states, &schedule, now);
    let runs = schedule.iter().filter(|row| row.decision.is_run()).count();
    tracing::debug!(runs, total = schedule.len(), busy, "Computed check schedule");

    if commit {
        store.save_checks(&next)?;
    }

    let output = ScheduleOutput {
        now,
        busy,
        tier: budget.current_tier,
        interval_scale,
        checks: schedule
            .into_iter()
            .map(|row| ScheduleRow {
                id: row.check.id,
                critical: row.check.critical,
                decision: row.decision,
            })
            .collect(),
        tokens_saved: total_token_savings(&next),
        committed: commit,
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_check(env: &Env, action: CheckAction) -> Result<String> {
    match action {
        CheckAction::Record { check_id, status, now } => {
            let config = env.load_config()?;
            let check = config
                .scheduler
                .check(&check_id)
                .with_context(|| format!("unknown check: {}", check_id))?;
            let store = env.store()?;
            let now = now_or(now);

            let mut states = store.load_checks()?;
            let current = states
                .get(&check_id)
                .cloned()
                .unwrap_or_else(|| CheckState::never_run(&check_id));
            let next = current
                .record_decision(check, &Decision::Run, now)
                .with_status(status);
            states.insert(check_id, next.clone());
            store.save_checks(&states)?;

            Ok(serde_json::to_string(&next)?)
        }
    }
}

/// Persisted budget moved into the period that contains `now`
fn load_current_budget(
    store: &StateStore,
    policy: &BudgetPolicy,
    now: DateTime<Utc>,
) -> Result<BudgetState> {
    let budget = store.load_budget(policy)?;
    let current = budget.rolled_to(policy, now);
    if current.period_start != budget.period_start {
        tracing::info!(
            period_start = %current.period_start,
            period_end = %current.period_end,
            "Starting new budget period"
        );
    }
    Ok(current)
}

fn handle_budget(env: &Env, action: BudgetAction) -> Result<String> {
    let config = env.load_config()?;
    let policy = &config.budget;
    let store = env.store()?;

    match action {
        BudgetAction::Evaluate { now, commit } => {
            let now = now_or(now);
            let budget = load_current_budget(&store, policy, now)?;
            let usage = store.load_usage()?;
            let result = compute_optimization_actions(policy, &budget, &usage, now);
            tracing::debug!(
                tier = %result.new_tier,
                velocity = result.velocity,
                actions = result.actions.len(),
                "Evaluated budget"
            );

            if commit {
                let next = budget.accept(&result, policy.evaluation_ring_capacity);
                store.save_budget(&next)?;
            }

            let output = EvaluateOutput {
                actions: &result.actions,
                current_tier: budget.current_tier,
                new_tier: result.new_tier,
                projected_spend: result.projected_spend,
                velocity: result.velocity,
                remaining: result.remaining,
                committed: commit,
            };
            Ok(serde_json::to_string(&output)?)
        }
        BudgetAction::RecordUsage { tokens, requests, now } => {
            let now = now_or(now);
            let window = i64::try_from(policy.velocity.window_s)
                .unwrap_or(i64::MAX)
                .min(i64::MAX / 1000);
            let cutoff = now
                .checked_sub_signed(Duration::seconds(window))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let usage = store
                .load_usage()?
                .with_sample(UsageSample::new(now, tokens, requests))
                .pruned_before(cutoff);
            store.save_usage(&usage)?;

            let budget = load_current_budget(&store, policy, now)?.with_spend(tokens);
            store.save_budget(&budget)?;

            Ok(serde_json::json!({
                "spent": budget.cumulative_spent,
                "remaining": budget.remaining(),
                "samples": usage.samples.len(),
            })
            .to_string())
        }
        BudgetAction::Pin { tier, clear } => {
            let pin = if clear { None } else { tier };
            let budget = store.load_budget(policy)?.with_manual_tier(pin);
            store.save_budget(&budget)?;
            Ok(serde_json::json!({ "manual_tier": budget.manual_tier }).to_string())
        }
        BudgetAction::Status { now } => {
            let now = now_or(now);
            let budget = load_current_budget(&store, policy, now)?;
            let usage = store.load_usage()?;
            let output = BudgetStatusOutput {
                spent: budget.cumulative_spent,
                limit: budget.budget_limit,
                remaining: budget.remaining(),
                usage_pct: (budget.usage_fraction() * 1000.0).round() / 10.0,
                tier: budget.current_tier,
                model: policy
                    .tier_catalog
                    .get(budget.current_tier)
                    .map(|spec| spec.name.clone()),
                manual_tier: budget.manual_tier,
                paused: budget.paused.clone().filter(|_| budget.is_paused(now)),
                velocity: spending_velocity_at(&usage, &policy.velocity, now),
                period_end: budget.period_end,
                samples: usage.samples.len(),
            };
            Ok(serde_json::to_string(&output)?)
        }
    }
}

fn read_arg_or_stdin(text: String) -> Result<String> {
    if text == "-" {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading stdin")?;
        Ok(buffer)
    } else {
        Ok(text)
    }
}

fn handle_context(env: &Env, action: ContextAction) -> Result<String> {
    match action {
        ContextAction::Classify { task, level, keywords } => {
            let config = env.load_config()?;
            let task = read_arg_or_stdin(task)?;
            let signals = ClassificationSignals {
                keywords,
                requested_level: level,
                ..ClassificationSignals::from_task(&task)
            };
            let level = classify_complexity(&task, &signals, &config.context);
            let files = get_allowed_files(level, &config.context.catalog, &config.context);

            let output = ClassifyOutput {
                level,
                token_count: signals.token_count,
                scores: governor_lib::context::level_scores(&task, &signals).to_vec(),
                files,
            };
            Ok(serde_json::to_string(&output)?)
        }
    }
}

fn handle_tokens(action: TokensAction) -> Result<String> {
    match action {
        TokensAction::Count { text } => {
            let input = read_arg_or_stdin(text)?;
            let output = TokenCountOutput {
                tokens: count_tokens(&input),
            };
            Ok(serde_json::to_string(&output)?)
        }
    }
}
