//! `recall` binary entry point.

use anyhow::Context;
use clap::Parser;
use directories::BaseDirs;
use log::{LevelFilter, debug};
use recall_rs::output::{failure, internal_failure, success};
use recall_rs::{Cli, HttpGateways, Runtime};
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let payload = match run(cli).await {
        Ok(Ok(payload)) => success(payload),
        Ok(Err(err)) => failure(&err),
        Err(err) => internal_failure(&err),
    };
    let failed = payload["status"] != "ok";
    println!("{payload}");
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(cli: Cli) -> anyhow::Result<Result<Value, recall_rs_memory::MemoryError>> {
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    let runtime = Runtime::new(cwd, home, Arc::new(HttpGateways::from_env()));
    debug!("starting command (name={})", cli.command.name());
    Ok(runtime.execute(cli.command).await)
}

/// Logs go to stderr so stdout carries only the JSON result.
fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr);
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}
