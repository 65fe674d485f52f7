//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Run every participant of the scenario in this process on localhost
    Local,
    /// Run one participant; peers run in other processes
    Participant,
}

/// Side of the exchange (participant mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Provider,
    Consumer,
}

/// redist - Redistribute strided arrays between process groups
#[derive(Parser, Debug)]
#[command(name = "redist")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: local or participant
    #[arg(long, value_enum, default_value = "local")]
    pub mode: RunMode,

    /// TOML scenario file (built-in demo scenario if omitted)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Participant Options ===
    /// Role of this participant (participant mode only)
    #[arg(long, value_enum)]
    pub role: Option<RoleArg>,

    /// Rank of this participant within its group (participant mode only)
    #[arg(long)]
    pub rank: Option<u32>,

    /// Override this participant's axes (e.g., "0:9,0:18:2")
    #[arg(long)]
    pub axes: Option<String>,

    // === Exchange Options ===
    /// Exchange name shared by all participants
    #[arg(long)]
    pub name: Option<String>,

    /// Number of rounds to run
    #[arg(short = 'r', long)]
    pub rounds: Option<u32>,

    /// Bytes per array element (e.g., 8, 4k)
    #[arg(long)]
    pub element_size: Option<String>,

    // === Endpoint Options ===
    /// Address to bind the listener to (host or host:port)
    #[arg(long, env = "REDIST_BIND")]
    pub bind: Option<String>,

    /// Host published to peers (defaults to the bind host)
    #[arg(long)]
    pub advertise_host: Option<String>,

    /// Largest accepted payload (e.g., 64M)
    #[arg(long)]
    pub max_payload: Option<String>,

    /// Time allowed for draining sends on shutdown (e.g., 500ms, 5s)
    #[arg(long)]
    pub drain_timeout: Option<String>,

    // === Runtime Options ===
    /// Dry run - validate and print the scenario without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == RunMode::Participant {
            if self.role.is_none() {
                anyhow::bail!("--role is required in participant mode");
            }
            if self.rank.is_none() {
                anyhow::bail!("--rank is required in participant mode");
            }
        } else if self.role.is_some() || self.rank.is_some() || self.axes.is_some() {
            anyhow::bail!("--role, --rank and --axes only apply to participant mode");
        }

        if self.rounds == Some(0) {
            anyhow::bail!("rounds must be at least 1");
        }

        if let Some(ref name) = self.name {
            if name.trim().is_empty() {
                anyhow::bail!("exchange name must not be empty");
            }
        }

        Ok(())
    }
}
