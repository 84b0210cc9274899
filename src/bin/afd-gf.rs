//! The retrieve worker binary.

use std::process::ExitCode;

use clap::Parser;

use worker::FetchArgs;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = FetchArgs::parse();
    worker::run_fetch(&args).into()
}
