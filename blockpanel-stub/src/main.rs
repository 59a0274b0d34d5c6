use std::time::Duration;

use blockpanel_stub::{StubState, serve};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "blockpanel-stub")]
struct StubArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind_address: String,

    /// Delay every stop response, to exercise the shell's stop timeout.
    #[arg(long)]
    stop_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = StubArgs::parse();
    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    let mut state = StubState::new();
    if let Some(ms) = args.stop_delay_ms {
        state = state.with_stop_delay(Duration::from_millis(ms));
    }

    info!("stub backend starting on {}", args.bind_address);
    if let Err(err) = serve(listener, state).await {
        warn!("stub backend exited: {}", err);
    }
}
