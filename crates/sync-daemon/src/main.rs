//! Offer sync daemon
//!
//! Keeps the offer search index synchronized with the catalog.
//!
//! # Usage
//!
//! ```bash
//! offer-sync start [--foreground]
//! offer-sync stop
//! offer-sync status
//! offer-sync run drain [--until-empty]
//! offer-sync enqueue offers 1 2 3
//! offer-sync queues
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/offer-sync/config.toml)
//! 3. The file given with `--config`
//! 4. Environment variables (OFFER_SYNC_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use sync_daemon::{
    clear_index, enqueue, init_logging, load_settings, run_driver, run_worker, show_queues,
    show_status, start_daemon, stop_daemon, Cli, Commands,
};
use sync_types::VenueProviderJob;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Stop => return stop_daemon(),
        Commands::Status => return show_status(),
        _ => {}
    }

    let settings = load_settings(config_path, cli.log_level.as_deref())?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Start { foreground } => start_daemon(&settings, config_path, foreground).await?,
        Commands::Run { driver } => run_driver(&settings, config_path, driver).await?,
        Commands::Worker {
            job_id,
            provider_id,
            venue_id,
        } => run_worker(&settings, VenueProviderJob::new(job_id, provider_id, venue_id)).await?,
        Commands::Enqueue { target } => {
            let added = enqueue(&settings, target).await?;
            println!("{} new item(s) queued", added);
        }
        Commands::Queues => show_queues(&settings).await?,
        Commands::ClearIndex { yes } => clear_index(&settings, yes).await?,
        Commands::Stop | Commands::Status => {}
    }

    Ok(())
}
