use clap::Parser;
use dining_philosophers::{
    config::{DelayRange, PhilosopherConfig},
    log,
    philosopher::Philosopher,
    Result,
};

#[derive(Parser, Debug, Clone)]
#[clap(about = "A philosopher sitting at the distributed table")]
struct Opts {
    /// Port of this philosopher's ring server.
    #[clap(long)]
    port: u16,

    /// Address of the manager, as `host:port`.
    #[clap(long)]
    manager: String,

    /// Shortest thinking or sleeping delay, in milliseconds.
    #[clap(long = "min-delay-ms", default_value_t = 5)]
    min_delay_ms: u64,

    /// Longest thinking or sleeping delay, in milliseconds.
    #[clap(long = "max-delay-ms", default_value_t = 50)]
    max_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    log::init();
    let opts = Opts::parse();

    let config = PhilosopherConfig::new(opts.port, opts.manager)
        .with_delay(DelayRange::new(opts.min_delay_ms, opts.max_delay_ms)?);

    let report = Philosopher::bind(config).await?.run().await?;
    println!(
        "I am dead: meals={} deadlocks={} sent={} received={}",
        report.meals, report.deadlocks, report.messages_sent, report.messages_received
    );

    Ok(())
}
