mod ui;

use clap::Parser;
use crate::ui::cli;
use linkd_core::utils::logging::init_logging;

#[tokio::main]
async fn main() {
    init_logging();
    let args = cli::Args::parse();
    let code = cli::run_cli(args).await;
    std::process::exit(code);
}
