//! Offer sync daemon library exports.
//!
//! - `cli`: command-line argument parsing with clap
//! - `commands`: command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, EnqueueCommands, RunCommands};
pub use commands::{
    build_synchronizer, clear_index, enqueue, init_logging, load_settings, open_queue_store,
    queue_stats, run_driver, run_worker, show_queues, show_status, start_daemon, stop_daemon,
};
