//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::purpose::PurposeMethod;

/// PurposeBench - purpose-aware pub/sub encodings and benchmark tooling
#[derive(Parser)]
#[command(
    name = "pb",
    about = "Purpose-aware publish/subscribe encodings, correctness checks and benchmark sync",
    version,
    after_help = "Logs are written to: ~/.local/share/purposebench/logs/purposebench.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Expand a brace-grouped purpose filter into concrete purposes
    Expand {
        /// Filter expression, e.g. "a/{x,y}/b"
        filter: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the wire actions for a publish or subscribe
    Encode {
        /// Application topic
        topic: String,

        /// Purpose (publish) or purpose filter (with --subscribe)
        purpose: String,

        /// Purpose management method (pm1, pm2, pm3, pm4)
        #[arg(short, long, default_value = "pm1")]
        method: PurposeMethod,

        /// Encode a subscribe instead of a publish
        #[arg(short, long)]
        subscribe: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the correctness scenario over the in-memory broker
    Correctness {
        /// Only this method (default: all four)
        #[arg(short, long)]
        method: Option<PurposeMethod>,

        /// GOOD/BAD publish rounds per method
        #[arg(short, long, default_value = "3")]
        rounds: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run in-process nodes through the ready/done barrier
    ///
    /// Every node runs in this process on the in-memory broker; nodes on
    /// other hosts cannot join.
    Sync {
        /// Number of nodes (default: the configured expected nodes)
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Purpose management method for lifecycle messages
        #[arg(short, long, default_value = "pm1")]
        method: PurposeMethod,

        /// Give up waiting after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,
    },

    /// Run the randomized client workload
    Simulate {
        /// Number of simulated clients
        #[arg(long)]
        clients: Option<usize>,

        /// Number of cycles
        #[arg(long)]
        cycles: Option<usize>,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Pause between cycles
        #[arg(long)]
        seconds_between: Option<f64>,

        /// Purpose management method
        #[arg(short, long, default_value = "pm1")]
        method: PurposeMethod,

        /// Result log path (default: a new file under the results dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Output format for command results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written when not logging to stderr
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("purposebench")
        .join("logs")
        .join("purposebench.log")
}
