//! shipcheck CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use shipcheck_common::telemetry::LogFormat;

/// shipcheck - end-to-end scenarios for a Kubernetes build platform
#[derive(Parser, Debug)]
#[command(name = "shipcheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (human or json)
    #[arg(long, global = true, env = "SHIPCHECK_LOG_FORMAT", default_value = "human")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios against the cluster
    Run(commands::run::RunArgs),
    /// List the scenarios in a catalog
    List(commands::list::ListArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
            Commands::List(args) => commands::list::run(args),
        }
    }
}
