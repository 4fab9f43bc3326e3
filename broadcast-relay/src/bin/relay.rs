use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use broadcast_relay::{Multiplexer, RelayConfig, cli::RelayCli};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = RelayCli::parse();
    let config = RelayConfig::try_from(cli.relay).context("invalid relay configuration")?;

    let relay = match Multiplexer::bind(config) {
        Ok(relay) => relay,
        Err(err) => {
            error!("relay start failed: {err:#}");
            return Err(err.into());
        }
    };
    info!("relay listening on {}", relay.local_addr()?);

    if let Err(err) = relay.run_until_ctrl_c().await {
        error!("relay stopped with error: {err:?}");
        return Err(err.into());
    }
    info!("relay stopped");

    Ok(())
}
