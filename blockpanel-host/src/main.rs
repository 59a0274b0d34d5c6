#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

mod app;

use std::sync::Arc;

use blockpanel_host::{
    config::{HostArgs, HostConfig},
    dialogs::show_error,
    logging::init_logging,
    session::AppSession,
    shutdown::ShutdownReason,
};
use clap::Parser;
use tracing::{error, info};

fn main() {
    let args = HostArgs::parse();
    let config = HostConfig::from_args(args);
    init_logging(&config.log_dir());
    info!(mode = ?config.mode, data_dir = %config.data_dir.display(), "BlockPanel starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("tokio runtime init failed: {err}");
            show_error("BlockPanel", &format!("Failed to start:\n\n{err}"));
            std::process::exit(1);
        }
    };

    let session = match runtime.block_on(AppSession::create(config)) {
        Ok(session) => Arc::new(session),
        Err(err) => {
            error!("failed to start backend: {err}");
            show_error("Backend Error", &format!("Failed to start the backend:\n\n{err}"));
            std::process::exit(1);
        }
    };

    {
        let _enter = runtime.enter();
        session.exit_after_shutdown();
    }

    if let Err(err) = app::run(runtime.handle().clone(), Arc::clone(&session)) {
        error!("window failed: {err}");
    }

    // Only reached when the window went away without the shutdown sequence
    // exiting the process first.
    runtime.block_on(async {
        let coordinator = session.coordinator();
        if !coordinator.shutdown(ShutdownReason::Quit).await {
            coordinator.wait_for_exit().await;
        }
    });
    session.teardown();
    std::process::exit(0);
}
