pub mod batch;
pub mod cli;
pub mod enrich;
pub mod io_utils;
pub mod manifest;
pub mod normalize;
pub mod reconcile;
pub mod render;
pub mod resolve;
pub mod rollup;
pub mod table;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, debug};

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sales_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    debug!("Parsed command: {:?}", cli.command);
    match cli.command {
        Commands::Enrich(args) => enrich::execute(&args),
        Commands::Validate(args) => validate::execute(&args),
        Commands::Reconcile(args) => reconcile::execute(&args),
        Commands::Run(args) => batch::execute(&args),
        Commands::Rollup(args) => rollup::execute(&args),
    }
}
