use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod commands;
mod config;
mod db;
mod models;
mod services;
mod utils;
mod web;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = commands::Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("paylink=debug".parse()?)
                .add_directive("sqlx=warn".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting paylink v{}...", env!("CARGO_PKG_VERSION"));
    info!("  ___  __ _ _  _| (_)_ _  | |__");
    info!(" | _ \\/ _` | || | | | ' \\ | / /");
    info!(" |  _/\\__,_|\\_, |_|_|_||_||_\\_\\");
    info!(" |_|        |__/  crypto payment links");
    info!("");

    let config = config::Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded ({} environment)", config.app_env);

    commands::run(cli, config).await
}
