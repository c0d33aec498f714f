//! layerctl - 多容器应用的声明式 layer 编排
//!
//! Usage:
//! - Bring an application up: `layerctl up shop`
//! - One layer only: `layerctl up shop/web --pull`
//! - Run a one-shot layer: `layerctl run shop migrate -- --step 2`
//! - Watch cron entries: `layerctl cron`

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "layerctl=debug"
    } else {
        "layerctl=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // 单线程运行时：所有并发都是等待容器运行时的 I/O
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(cli::execute(cli)) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
