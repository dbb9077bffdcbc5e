use clap::{Parser, Subcommand};

/// `botherd` - remote-control panel for auxiliary bot scripts.
#[derive(Parser, Debug)]
#[command(name = "botherd")]
#[command(version = "0.1.0")]
#[command(about = "Start, stop, and monitor auxiliary bot scripts.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon (reconciliation loop + Telegram channel + HTTP mirror)
    Run,

    /// Register a bot that runs on this machine
    AddLocal {
        /// Unique bot name (also the kill pattern)
        name: String,

        /// Path to the script to execute
        script_path: String,

        /// Presentational group label
        #[arg(long)]
        group: Option<String>,

        /// Daily start time, HH:MM (24h)
        #[arg(long)]
        schedule: Option<String>,
    },

    /// Register a bot that runs on a remote host over SSH
    AddRemote {
        /// Unique bot name (also the kill pattern)
        name: String,

        /// Path to the script on the remote host
        script_path: String,

        /// Remote host (IP or hostname)
        #[arg(long)]
        host: String,

        /// SSH port
        #[arg(long, default_value = "22")]
        port: u16,

        /// SSH login user
        #[arg(long)]
        user: String,

        /// Password credential (mutually exclusive with --key)
        #[arg(long, conflicts_with = "key")]
        password: Option<String>,

        /// Private-key file credential (mutually exclusive with --password)
        #[arg(long)]
        key: Option<String>,

        /// Presentational group label
        #[arg(long)]
        group: Option<String>,

        /// Daily start time, HH:MM (24h)
        #[arg(long)]
        schedule: Option<String>,
    },

    /// List all registered bots
    List,

    /// Start a bot
    Start { id: i64 },

    /// Stop a bot
    Stop { id: i64 },

    /// Restart a bot (stop, short pause, start)
    Restart { id: i64 },

    /// Delete a bot record
    Rm { id: i64 },

    /// Set or clear a bot's daily start time
    Schedule {
        id: i64,
        /// HH:MM (24h), or "off" to clear
        time: String,
    },

    /// Show the tail of a bot's log
    Log {
        id: i64,
        /// Number of lines
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },
}
