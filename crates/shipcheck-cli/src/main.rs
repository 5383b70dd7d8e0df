//! shipcheck
//!
//! Runs end-to-end build scenarios against a build platform cluster.

use clap::Parser;

use shipcheck_cli::{Cli, Result};
use shipcheck_common::kube_utils::install_crypto_provider;
use shipcheck_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    install_crypto_provider();
    cli.run().await
}
