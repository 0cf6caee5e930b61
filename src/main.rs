mod cli;
mod config;
mod lifecycle;
mod logger;
mod model;
mod providers;
mod refid;
mod store;
mod sync;
mod util;

use anyhow::Result;
use log::debug;

use sync::SyncService;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = cli::parse_args(&args)?;

    if matches!(invocation.command, cli::Command::Help) {
        cli::print_help();
        return Ok(());
    }

    let root = invocation.project_root()?;
    let config = config::load_config(&root)?;
    logger::init(&config.logging)?;
    debug!(
        "Ticketing {} ({:?}), tasks file {}",
        if config.ticketing.enabled { "enabled" } else { "disabled" },
        config.ticketing.system,
        invocation.tasks_path(&root).display()
    );

    // One service for the whole run; every command borrows it.
    let sync = SyncService::new(&config.ticketing);
    cli::run(&invocation, &sync).await
}
