//! Phloem Scheduler
//!
//! Control plane for task allocation and worker management.
//!
//! Usage:
//!     phloem-scheduler --bind tcp://127.0.0.1:6378 --policy resources

use anyhow::Context;
use clap::Parser;
use phloem_logging::LogConfig;
use phloem_scheduler::{PolicyKind, Scheduler, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(name = "phloem-scheduler", about = "Phloem task scheduler")]
struct Args {
    /// ZMQ bind address for clients and workers
    #[arg(long, default_value_t = phloem_protocol::defaults::DEFAULT_SCHEDULER_BIND_ADDR.to_string())]
    bind: String,

    /// Allocation policy: even or resources
    #[arg(long, default_value = "even")]
    policy: String,

    /// Log debug output to the console
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    phloem_logging::init_logging(LogConfig {
        app_name: "phloem-scheduler",
        verbose: args.verbose,
    })?;

    let policy: PolicyKind = args
        .policy
        .parse()
        .map_err(anyhow::Error::msg)
        .context("Failed to parse --policy")?;

    tracing::info!("Starting Phloem scheduler");
    tracing::info!("  Bind: {}", args.bind);
    tracing::info!("  Policy: {}", policy);

    let config = SchedulerConfig {
        bind_addr: args.bind,
        policy,
    };

    let mut scheduler = Scheduler::bind(config)?;
    scheduler.run()?;

    Ok(())
}
