//! jobscale — autoscale background-job workers from queue metrics.
//!
//! # Usage
//!
//! ```text
//! jobscale init
//! jobscale scale --worker default
//! jobscale run --interval 30
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod runtime;

use commands::inspect::MetricsFormat;
use config::JobscaleConfig;

#[derive(Parser)]
#[command(
    name = "jobscale",
    about = "Queue-driven autoscaler for background job workers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to jobscale.toml.
    #[arg(long, global = true, default_value = "jobscale.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one decide-and-apply cycle for a worker group.
    Scale {
        #[arg(short, long, default_value = "default")]
        worker: String,
        /// Wait for the worker group's lock instead of skipping.
        #[arg(long)]
        wait: bool,
    },
    /// Run one cycle for every configured worker group.
    ScaleAll,
    /// Show queue metrics.
    Metrics {
        #[arg(short, long)]
        worker: Option<String>,
        #[arg(short, long, value_enum, default_value_t = MetricsFormat::Text)]
        format: MetricsFormat,
    },
    /// Show the current worker count reported by each platform.
    Workers {
        #[arg(short, long)]
        worker: Option<String>,
    },
    /// Inspect or clear cooldown timestamps.
    Cooldown {
        #[command(subcommand)]
        action: CooldownAction,
    },
    /// List configured worker groups.
    List,
    /// Show recent scale events.
    Events {
        #[arg(short, long)]
        worker: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete scale events older than a number of days.
    PruneEvents {
        #[arg(long, default_value = "30")]
        older_than_days: u32,
    },
    /// Scale every worker group on an interval until interrupted.
    Run {
        /// Seconds between cycles.
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },
    /// Write a starter jobscale.toml.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CooldownAction {
    Show {
        #[arg(short, long)]
        worker: Option<String>,
    },
    Reset {
        #[arg(short, long)]
        worker: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jobscale=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    if let Command::Init { force } = cli.command {
        return commands::init::init(&cli.config, force);
    }

    let config = JobscaleConfig::from_file(&cli.config)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", cli.config.display()))?;

    match cli.command {
        Command::Events { worker, limit } => {
            let state = runtime::open_state(&config).await?;
            commands::events::list(&state, worker.as_deref(), limit).await
        }
        Command::PruneEvents { older_than_days } => {
            let state = runtime::open_state(&config).await?;
            commands::events::prune(&state, older_than_days).await
        }
        command => {
            let autoscaler = runtime::build(&config).await?;
            match command {
                Command::Scale { worker, wait } => {
                    commands::scale::scale(&autoscaler, &worker, wait).await
                }
                Command::ScaleAll => commands::scale::scale_all(&autoscaler).await,
                Command::Metrics { worker, format } => {
                    commands::inspect::metrics(&autoscaler, worker.as_deref(), format).await
                }
                Command::Workers { worker } => {
                    commands::inspect::workers(&autoscaler, worker.as_deref()).await
                }
                Command::Cooldown { action } => match action {
                    CooldownAction::Show { worker } => {
                        commands::cooldown::show(&autoscaler, worker.as_deref()).await
                    }
                    CooldownAction::Reset { worker } => {
                        commands::cooldown::reset(&autoscaler, worker.as_deref()).await
                    }
                },
                Command::List => commands::inspect::list(&autoscaler),
                Command::Run { interval } => commands::run::run(&autoscaler, interval).await,
                Command::Init { .. } | Command::Events { .. } | Command::PruneEvents { .. } => {
                    unreachable!("handled above")
                }
            }
        }
    }
}
