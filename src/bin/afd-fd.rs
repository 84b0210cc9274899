//! The dispatcher binary.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use afd_core::WorkDir;
use fd::config::Tables;

/// AFD dispatch engine.
#[derive(Debug, Parser)]
#[command(name = "afd-fd", about = "AFD dispatch engine", version)]
struct Args {
    /// AFD working directory (falls back to $AFD_WORK_DIR).
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Host and directory table file.
    #[arg(long)]
    tables: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let work = match WorkDir::resolve(args.work_dir) {
        Ok(work) => work,
        Err(e) => {
            error!("cannot resolve the working directory: {e}");
            return ExitCode::FAILURE;
        }
    };
    let tables = match Tables::load(&args.tables) {
        Ok(tables) => tables,
        Err(e) => {
            error!("cannot load {}: {e}", args.tables.display());
            return ExitCode::FAILURE;
        }
    };
    match fd::run(&work, &tables) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("dispatcher failed: {e}");
            ExitCode::FAILURE
        }
    }
}
