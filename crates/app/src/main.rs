//! lanlobby - LAN game lobby browser, host and chat console

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod display;
mod network;
mod platform;
mod state;

use cli::{Cli, Command};

fn main() -> ExitCode {
    // Logs go to stderr so they do not interleave with chat on stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting lanlobby");

    platform::log_platform_info();

    let mut app_state = match state::AppState::new(cli.config.as_deref()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Command::Host(args) => network::run_host(&mut app_state, args).await,
            Command::Browse(args) => network::run_browse(&mut app_state, args).await,
            Command::Join(args) => network::run_join(&mut app_state, args).await,
        }
    });

    // A pending stdin read would otherwise hold the runtime open
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lanlobby: {}", e);
            ExitCode::FAILURE
        }
    }
}
