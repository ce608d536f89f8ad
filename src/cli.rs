use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "nudge",
    about = "Auto-continue watcher for tmux-hosted coding agents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch a pane and re-send the follow-up message on each completed turn
    Watch {
        /// tmux pane target (pane id like `%3`, or anything tmux resolves)
        pane: String,

        /// Session id to watch, or "auto" to detect from the pane
        #[arg(long, default_value = "auto")]
        session: String,

        /// Inline follow-up message (overrides the configured default)
        #[arg(long, conflicts_with = "message_file")]
        message: Option<String>,

        /// Read the follow-up message from a file
        #[arg(long, value_name = "FILE")]
        message_file: Option<PathBuf>,

        /// Minimum seconds between deliveries
        #[arg(long)]
        cooldown_secs: Option<f64>,

        /// Only deliver while the pane is its window's active pane
        #[arg(long)]
        require_pane_active: bool,
    },

    /// Print the health snapshot a watcher maintains for a pane
    Health {
        /// tmux pane target
        pane: String,

        /// Emit the raw snapshot JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
