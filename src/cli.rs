//! CLI argument parsing for the sms-trigger-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sms-trigger-worker", about = "Rule-driven customer SMS worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Evaluate every active trigger rule once and exit
    RunTriggers,
    /// Send due draft messages once and exit
    Dispatch {
        /// Maximum messages to send in this sweep
        #[arg(long)]
        limit: Option<i64>,
    },
}
