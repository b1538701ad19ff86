//! gamepanel CLI - Main entry point

mod commands;
mod output;

use clap::{Parser, Subcommand};
use gamepanel_core::PluginManager;
use gamepanel_foundation::{Actor, RuntimeConfig};
use output::OutputMode;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// gamepanel - plugin runtime for the game server admin panel
#[derive(Parser, Debug)]
#[command(name = "gamepanel")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Project directory holding .gamepanel/gamepanel.json
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Plugin root (overrides config)
    #[arg(long, global = true)]
    plugin_root: Option<PathBuf>,

    /// Data directory for the SQLite database (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Operator id recorded in the audit log
    #[arg(long, global = true, default_value = "admin")]
    user: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the plugin root and register what was found
    Scan,
    /// List registered plugins
    List,
    /// Show one plugin's state, health and contributions
    Status { name: String },
    /// Plugin counts by state
    Summary,
    /// Enable a plugin
    Enable { name: String },
    /// Disable a plugin
    Disable {
        name: String,
        /// Also disable enabled plugins that depend on it
        #[arg(long)]
        cascade: bool,
    },
    /// Run one health check pass
    Health,
    /// Run health checks periodically until interrupted
    Watch,
    /// Print the activation order
    Order,
    /// Show the lifecycle audit log
    Audit {
        /// Only records for this plugin
        #[arg(short, long)]
        plugin: Option<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Install a plugin bundle from a local directory
    Install { source: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, stdout is for command output)
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&args)?;
    let mode = OutputMode::from_flag(args.json);
    let actor = Actor::user(args.user.clone());

    let manager = PluginManager::open(&config).await?;

    // 설치는 레지스트리를 건드리지 않는다
    if let Command::Install { source } = &args.command {
        return commands::install(&manager, source, mode).await;
    }

    let report = manager.boot().await?;
    if !report.is_clean() {
        tracing::warn!(
            load_failures = report.discovery.failures.len(),
            rejected = report.discovery.rejected.len(),
            faulted = report.faulted.len(),
            "Plugin runtime booted with problems"
        );
    }

    match &args.command {
        Command::Scan => commands::print_boot_report(&report, mode),
        Command::List => commands::list(&manager, mode),
        Command::Status { name } => commands::status(&manager, name, mode),
        Command::Summary => commands::summary(&manager, mode),
        Command::Enable { name } => commands::enable(&manager, name, actor, mode).await,
        Command::Disable { name, cascade } => {
            commands::disable(&manager, name, *cascade, actor, mode).await
        }
        Command::Health => commands::health(&manager, mode).await,
        Command::Watch => commands::watch(&manager).await,
        Command::Order => commands::order(&manager, mode),
        Command::Audit { plugin, limit } => {
            commands::audit(&manager, plugin.as_deref(), *limit, mode).await
        }
        Command::Install { .. } => Ok(()),
    }
}

/// 글로벌 + 프로젝트 설정을 읽고 CLI 옵션으로 덮어쓴다
fn load_config(args: &Args) -> anyhow::Result<RuntimeConfig> {
    let project = match &args.project {
        Some(project) => project.clone(),
        None => std::env::current_dir()?,
    };

    let mut config = RuntimeConfig::load_for(&project)?;
    if let Some(root) = &args.plugin_root {
        config.plugin_root = root.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }

    Ok(config.resolve_paths(&project))
}
