use anyhow::Context;
use basalt_config::DriverConfig;
use basalt_engine::BasaltEngine;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => DriverConfig::load(path.as_str()).with_context(|| format!("loading {path}"))?,
        None => DriverConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = BasaltEngine::new(config).context("invalid driver config")?;
    let report = engine.run().context("session failed")?;

    tracing::info!(
        published_per_sec = report.publish_rate() as u64,
        received_per_sec = report.receive_rate() as u64,
        "throughput"
    );
    print!("{report}");
    Ok(())
}
