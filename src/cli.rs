//! 命令行定义与执行

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use layerctl::config::env::{constants, Settings};
use layerctl::domain::LogLine;
use layerctl::infra::runtime::LogsOptions;
use layerctl::infra::DockerCli;
use layerctl::services::apps::{self, Action, ExecutionMode, Target};
use layerctl::services::lifecycle::{self, DownOptions, UpOptions};
use layerctl::services::runner::{self, RunOptions};
use layerctl::services::CronScanner;
use layerctl::state::{get_shutdown_token, trigger_shutdown};
use layerctl::Context;

/// layerctl - declarative layer orchestrator for multi-container applications
#[derive(Parser)]
#[command(name = "layerctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding application documents (overrides LAYERCTL_APPS_DIR)
    #[arg(long, global = true)]
    pub apps_dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring applications or single layers up
    Up(UpArgs),
    /// Bring applications or single layers down
    Down(DownArgs),
    /// Recreate running layers
    Restart(TargetArgs),
    /// Pull layer images
    Pull(TargetArgs),
    /// Execute a run-only layer
    Run(RunArgs),
    /// Show layer status
    Status(StatusArgs),
    /// Show container logs of a layer
    Logs(LogsArgs),
    /// Execute due cron entries
    Cron(CronArgs),
}

#[derive(Args)]
pub struct UpArgs {
    /// `<app>` or `<app>/<layer>`
    #[arg(required = true)]
    pub targets: Vec<Target>,

    /// Always pull images before creating containers
    #[arg(long)]
    pub pull: bool,

    /// Suppress lifecycle messages
    #[arg(short, long)]
    pub quiet: bool,

    /// Process targets concurrently
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Args)]
pub struct DownArgs {
    /// `<app>` or `<app>/<layer>`
    #[arg(required = true)]
    pub targets: Vec<Target>,

    /// Remove containers after stopping them
    #[arg(long)]
    pub rm: bool,

    #[arg(short, long)]
    pub quiet: bool,

    /// Process targets concurrently
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Args)]
pub struct TargetArgs {
    /// `<app>` or `<app>/<layer>`
    #[arg(required = true)]
    pub targets: Vec<Target>,

    #[arg(short, long)]
    pub quiet: bool,

    /// Process targets concurrently
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Args)]
pub struct RunArgs {
    pub application: String,
    pub layer: String,

    /// Extra arguments appended to the layer command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Always pull the image first
    #[arg(long)]
    pub pull: bool,

    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Only this application
    pub application: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct LogsArgs {
    pub application: String,
    pub layer: String,

    /// Number of lines to show from the end
    #[arg(long, default_value_t = 100)]
    pub tail: usize,

    /// Show timestamps
    #[arg(short, long)]
    pub timestamps: bool,

    /// Follow log output
    #[arg(short, long)]
    pub follow: bool,
}

#[derive(Args)]
pub struct CronArgs {
    /// Scan once and exit instead of watching
    #[arg(long)]
    pub once: bool,

    /// Execute due entries concurrently
    #[arg(long)]
    pub parallel: bool,
}

/// 执行命令
pub async fn execute(cli: Cli) -> Result<()> {
    let mut settings = Settings::from_env();
    if let Some(dir) = cli.apps_dir {
        settings.apps_dir = dir;
    }
    debug!(
        version = constants::VERSION,
        apps_dir = %settings.apps_dir.display(),
        docker_host = ?settings.docker_host,
        "Loading applications"
    );

    let runtime = Arc::new(DockerCli::new(&settings).with_shutdown(get_shutdown_token()));
    let ctx = Context::load(settings, runtime)
        .await
        .context("failed to load applications")?;

    match cli.command {
        Commands::Up(args) => {
            let options = UpOptions {
                pull: args.pull,
                quiet: args.quiet,
            };
            apply(&ctx, &args.targets, Action::Up(options), args.parallel).await
        }
        Commands::Down(args) => {
            let options = DownOptions {
                rm: args.rm,
                force: false,
                quiet: args.quiet,
            };
            apply(&ctx, &args.targets, Action::Down(options), args.parallel).await
        }
        Commands::Restart(args) => {
            let options = UpOptions {
                pull: false,
                quiet: args.quiet,
            };
            apply(&ctx, &args.targets, Action::Restart(options), args.parallel).await
        }
        Commands::Pull(args) => {
            let action = Action::Pull { quiet: args.quiet };
            apply(&ctx, &args.targets, action, args.parallel).await
        }
        Commands::Run(args) => execute_run(&ctx, args).await,
        Commands::Status(args) => execute_status(&ctx, args).await,
        Commands::Logs(args) => execute_logs(&ctx, args).await,
        Commands::Cron(args) => execute_cron(&ctx, args).await,
    }
}

async fn apply(ctx: &Context, targets: &[Target], action: Action, parallel: bool) -> Result<()> {
    apps::apply_all(ctx, targets, action, ExecutionMode::from_parallel(parallel)).await?;
    Ok(())
}

async fn execute_run(ctx: &Context, args: RunArgs) -> Result<()> {
    let app = ctx.application(&args.application)?;
    let layer = app.layer(&args.layer)?;
    let options = RunOptions {
        args: args.args,
        command: None,
        pull: args.pull,
        quiet: args.quiet,
        interactive: std::io::stdin().is_terminal(),
    };
    runner::run(ctx, app, layer, options).await?;
    Ok(())
}

async fn execute_status(ctx: &Context, args: StatusArgs) -> Result<()> {
    let applications = match &args.application {
        Some(name) => vec![ctx.application(name)?],
        None => ctx.applications().iter().collect(),
    };

    let mut report = BTreeMap::new();
    for app in applications {
        report.insert(app.name().to_string(), apps::status(ctx, app).await);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for (name, statuses) in &report {
        println!("{}", name);
        for status in statuses {
            println!("  {}", status);
        }
    }
    Ok(())
}

async fn execute_logs(ctx: &Context, args: LogsArgs) -> Result<()> {
    let app = ctx.application(&args.application)?;
    let layer = app.layer(&args.layer)?;
    let options = LogsOptions {
        timestamps: args.timestamps,
        tail: args.tail,
        follow: args.follow,
    };

    if args.follow {
        spawn_ctrl_c_handler();
    }

    let (log_tx, log_rx) = broadcast::channel::<LogLine>(256);
    let printer = spawn_log_printer(log_rx);

    let result = lifecycle::logs(ctx, layer, &options, log_tx).await;
    let _ = printer.await;
    result?;
    Ok(())
}

/// 把日志行打印到 stdout / stderr，发送端全部关闭后结束
fn spawn_log_printer(mut log_rx: broadcast::Receiver<LogLine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match log_rx.recv().await {
                Ok(line) if line.is_stderr() => eprintln!("{}", line.content),
                Ok(line) => println!("{}", line.content),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Log output lagged, lines dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn execute_cron(ctx: &Context, args: CronArgs) -> Result<()> {
    let mut scanner = CronScanner::new(ExecutionMode::from_parallel(args.parallel));
    if args.once {
        let count = scanner.scan(ctx, Utc::now()).await?;
        debug!(count, "Cron scan finished");
        return Ok(());
    }

    spawn_ctrl_c_handler();
    let tick = Duration::from_millis(ctx.settings.cron_tick_ms.max(1));
    scanner.watch(ctx, tick, get_shutdown_token()).await;
    Ok(())
}

/// Ctrl-C 时触发全局 shutdown
fn spawn_ctrl_c_handler() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger_shutdown();
        }
    });
}
