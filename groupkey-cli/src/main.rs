use anyhow::{Context, Result};
use clap::Parser;
use groupkey_core::config::Config;
use groupkey_core::core_group::page_codec::{page_count, page_range};
use groupkey_core::core_group::providers::{MemoryGroupStore, MockGroupCrypto, MockGroupGateway};
use groupkey_core::core_group::{
    FinishOutcome, Group, GroupContext, GroupData, PageBoundary, RotationOutput, UserContext,
};
use groupkey_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use groupkey_core::test_utils::make_keys;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "groupkey")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides `[logging] level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging; overrides `[logging] json_format`
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; defaults plus GROUPKEY_* overrides otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Load, validate and print the effective configuration
    CheckConfig,

    /// Show how a key history of the given size is split into transfer pages
    PagePlan {
        /// Number of keys in the history
        #[arg(short, long)]
        keys: usize,

        /// Keys per page (overrides the configuration)
        #[arg(long)]
        page_size: Option<usize>,

        /// Use the inclusive page boundary instead of the configured one
        #[arg(long)]
        inclusive: bool,
    },

    /// Run the rotation finish loop against in-memory providers
    SimulateRotation {
        /// Chained rotation outputs, delivered newest first
        #[arg(long, default_value_t = 3)]
        pending: usize,

        /// Extra outputs whose pre-key never arrives
        #[arg(long, default_value_t = 0)]
        missing: usize,

        /// Keys the server holds that the local member has not fetched yet
        #[arg(long, default_value_t = 0)]
        lagging: usize,

        /// Fail when the run ends incomplete
        #[arg(long)]
        strict: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Logging settings from `[logging]`, with command line flags taking precedence
fn log_config(args: &Args, config: &Config) -> Result<LogConfig> {
    let mut log_config = LogConfig::try_from(&config.logging)?;

    if let Some(level) = &args.log_level {
        match level.parse::<LogLevel>() {
            Ok(level) => log_config.level = level,
            Err(_) => eprintln!("Invalid log level '{}', using '{}'", level, log_config.level),
        }
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    Ok(log_config)
}

fn page_plan(config: &Config, keys: usize, page_size: Option<usize>, inclusive: bool) -> Result<()> {
    let page_size = page_size.unwrap_or(config.keys.page_size);
    anyhow::ensure!(page_size > 0, "page size must be positive");
    let boundary = if inclusive { PageBoundary::Inclusive } else { config.keys.page_boundary };

    let pages = page_count(keys, page_size, boundary)?;
    let plan = (0..pages)
        .map(|index| {
            let (range, has_more) = page_range(keys, index, page_size, boundary)?;
            Ok(serde_json::json!({
                "page": index,
                "start": range.start,
                "end": range.end,
                "keys": range.len(),
                "has_more": has_more,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = serde_json::json!({
        "keys": keys,
        "page_size": page_size,
        "boundary": boundary.as_str(),
        "pages": plan,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn simulate_rotation(config: Config, pending: usize, missing: usize, lagging: usize, strict: bool) -> Result<()> {
    const HISTORY: usize = 5;

    let gateway = Arc::new(MockGroupGateway::with_keys(make_keys(HISTORY + lagging)));

    // Chain: each output rotates from the key the previous one produces
    let mut chain = Vec::with_capacity(pending);
    let mut pre_key = format!("key-{}", HISTORY + lagging - 1);
    for i in 0..pending {
        let server_output = format!("sim-{}", i);
        let next = MockGroupCrypto::rotated_key_id(&pre_key, &server_output);
        chain.push(RotationOutput { pre_group_key_id: pre_key, server_output });
        pre_key = next;
    }
    for output in chain.into_iter().rev() {
        gateway.push_rotation_output(output);
    }
    for i in 0..missing {
        gateway.push_rotation_output(RotationOutput {
            pre_group_key_id: format!("missing-{}", i),
            server_output: format!("lost-{}", i),
        });
    }

    let ctx = GroupContext::new(
        gateway.clone(),
        Arc::new(MockGroupCrypto::new()),
        Arc::new(MemoryGroupStore::new()),
        Arc::new(config),
    );
    let data = GroupData::new("simulated", 1, make_keys(HISTORY))?;
    let user = UserContext::new("simulator", "sim-pk", "sim-sk", "sim-jwt");
    let mut group = Group::new(data, user, ctx);

    info!(pending, missing, lagging, "Starting simulated rotation finish");
    let outcome = group.finish_rotation_with_timeout().await?;

    let unresolved: Vec<&str> = match &outcome {
        FinishOutcome::Completed { .. } => Vec::new(),
        FinishOutcome::Incomplete { unresolved, .. } => {
            unresolved.iter().map(|o| o.pre_group_key_id.as_str()).collect()
        }
    };
    let summary = serde_json::json!({
        "complete": outcome.is_complete(),
        "rounds": outcome.rounds(),
        "resolved": outcome.resolved(),
        "unresolved_pre_keys": unresolved,
        "fetch_calls": gateway.fetch_calls(),
        "local_keys": group.keys().len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !outcome.is_complete() {
        warn!(unresolved = unresolved.len(), "Simulated rotation ended incomplete");
    }
    if strict {
        outcome.ensure_complete()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration first, so `[logging]` and GROUPKEY_LOG_* apply
    let config = load_config(args.config.as_ref())?;

    // Initialize logging
    init_logging_with_config(log_config(&args, &config)?)?;

    match args.command {
        Some(Command::CheckConfig) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("Configuration is valid");
        }
        Some(Command::PagePlan { keys, page_size, inclusive }) => {
            page_plan(&config, keys, page_size, inclusive)?;
        }
        Some(Command::SimulateRotation { pending, missing, lagging, strict }) => {
            simulate_rotation(config, pending, missing, lagging, strict).await?;
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
