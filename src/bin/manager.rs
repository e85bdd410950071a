use clap::Parser;
use dining_philosophers::{
    config::ManagerConfig, log, manager::Manager, message::Mode, Result,
};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(about = "Seats the philosophers and supervises the dinner")]
struct Opts {
    /// Port to accept philosophers on.
    #[clap(long)]
    port: u16,

    /// Number of philosophers to wait for.
    #[clap(long)]
    philosophers: usize,

    /// Seconds the dinner lasts once it has begun.
    #[clap(long)]
    duration: u64,

    /// Only the holder of the circulating token may take forks.
    #[clap(long)]
    token: bool,

    #[clap(long = "poll-interval-ms", default_value_t = 500)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    log::init();
    let opts = Opts::parse();

    let mode = if opts.token {
        Mode::Token
    } else {
        Mode::WithoutToken
    };
    let config = ManagerConfig::new(
        opts.port,
        opts.philosophers,
        Duration::from_secs(opts.duration),
        mode,
    )?
    .with_poll_interval(Duration::from_millis(opts.poll_interval_ms));

    let report = Manager::bind(config).await?.run().await?;
    for (address, stats) in &report.final_stats {
        println!(
            "{address}\tmeals={}\tdeadlocks={}\tsent={}\treceived={}",
            stats.meals, stats.deadlocks, stats.messages_sent, stats.messages_received
        );
    }

    Ok(())
}
