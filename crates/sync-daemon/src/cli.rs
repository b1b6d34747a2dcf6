//! CLI argument parsing for the offer sync daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Offer search index synchronization
///
/// Keeps the offer search index in line with the catalog by draining
/// change queues on a schedule.
#[derive(Parser, Debug)]
#[command(name = "offer-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ~/.config/offer-sync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduler daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Run one driver now and exit
    Run {
        #[command(subcommand)]
        driver: RunCommands,
    },

    /// Synchronize the offers of one venue provider job (started by the dispatcher)
    Worker {
        #[arg(long)]
        job_id: i64,

        #[arg(long)]
        provider_id: i64,

        #[arg(long)]
        venue_id: i64,
    },

    /// Add work to a queue
    Enqueue {
        #[command(subcommand)]
        target: EnqueueCommands,
    },

    /// Show queue lengths and in-flight provider jobs
    Queues,

    /// Remove every document from the search index
    ClearIndex {
        /// Confirm the index should be emptied
        #[arg(long)]
        yes: bool,
    },
}

/// Drivers runnable from the command line
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RunCommands {
    /// Drain event-driven offer ids
    Drain {
        /// Keep popping until the queue is empty
        #[arg(long)]
        until_empty: bool,
    },

    /// Reindex the whole catalog page by page
    ResyncAll {
        #[arg(long, default_value = "0")]
        starting_page: usize,

        /// Stop before this page
        #[arg(long)]
        ending_page: Option<usize>,
    },

    /// Reindex the offers of queued venues
    ResyncVenues,

    /// Run every queued venue provider job in this process
    ResyncVenueProviders,

    /// Remove offers expired in the sweep window
    SweepExpired {
        /// Sweep every offer expired since the epoch
        #[arg(long)]
        all: bool,
    },

    /// Retry offers whose indexing failed
    RetryErrors,

    /// Start workers for queued venue provider jobs
    Dispatch,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueCommands {
    /// Offer ids changed by mutation events
    Offers {
        #[arg(required = true)]
        ids: Vec<i64>,

        /// Push to the error queue instead of the main queue
        #[arg(long)]
        error: bool,
    },

    /// Venues whose offers need reindexing
    Venues {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// A venue provider import
    VenueProvider {
        #[arg(long)]
        job_id: i64,

        #[arg(long)]
        provider_id: i64,

        #[arg(long)]
        venue_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start_foreground() {
        let cli = Cli::parse_from(["offer-sync", "start", "--foreground"]);
        match cli.command {
            Commands::Start { foreground } => assert!(foreground),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "offer-sync",
            "queues",
            "--config",
            "/etc/offer-sync.toml",
            "-l",
            "debug",
        ]);
        assert_eq!(cli.config, Some("/etc/offer-sync.toml".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert!(matches!(cli.command, Commands::Queues));
    }

    #[test]
    fn test_cli_run_drain() {
        let cli = Cli::parse_from(["offer-sync", "run", "drain", "--until-empty"]);
        match cli.command {
            Commands::Run { driver } => {
                assert_eq!(driver, RunCommands::Drain { until_empty: true })
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_resync_all_pages() {
        let cli = Cli::parse_from([
            "offer-sync",
            "run",
            "resync-all",
            "--starting-page",
            "3",
            "--ending-page",
            "7",
        ]);
        match cli.command {
            Commands::Run { driver } => assert_eq!(
                driver,
                RunCommands::ResyncAll {
                    starting_page: 3,
                    ending_page: Some(7)
                }
            ),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_resync_all_defaults() {
        let cli = Cli::parse_from(["offer-sync", "run", "resync-all"]);
        match cli.command {
            Commands::Run { driver } => assert_eq!(
                driver,
                RunCommands::ResyncAll {
                    starting_page: 0,
                    ending_page: None
                }
            ),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_worker() {
        let cli = Cli::parse_from([
            "offer-sync",
            "worker",
            "--job-id",
            "1",
            "--provider-id",
            "2",
            "--venue-id",
            "3",
        ]);
        match cli.command {
            Commands::Worker {
                job_id,
                provider_id,
                venue_id,
            } => assert_eq!((job_id, provider_id, venue_id), (1, 2, 3)),
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_cli_enqueue_offers_to_error_queue() {
        let cli = Cli::parse_from(["offer-sync", "enqueue", "offers", "4", "5", "--error"]);
        match cli.command {
            Commands::Enqueue { target } => assert_eq!(
                target,
                EnqueueCommands::Offers {
                    ids: vec![4, 5],
                    error: true
                }
            ),
            _ => panic!("Expected Enqueue command"),
        }
    }

    #[test]
    fn test_cli_enqueue_requires_ids() {
        assert!(Cli::try_parse_from(["offer-sync", "enqueue", "venues"]).is_err());
    }

    #[test]
    fn test_cli_clear_index_flag() {
        let cli = Cli::parse_from(["offer-sync", "clear-index"]);
        assert!(matches!(cli.command, Commands::ClearIndex { yes: false }));
    }
}
