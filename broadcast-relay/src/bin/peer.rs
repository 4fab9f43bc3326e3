use std::process::ExitCode;

use clap::Parser;

use broadcast_relay::{cli::PeerArgs, peer};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// Every way out of the bridge is a failure: the session only ends when one
// side goes away.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = PeerArgs::parse();
    match peer::run(args).await {
        Ok(exit) => {
            eprintln!("peer stopped: {exit:?}");
        }
        Err(err) => {
            eprintln!("peer failed: {err:#}");
        }
    }
    ExitCode::FAILURE
}
