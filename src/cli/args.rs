//! CLI argument grammar.
//!
//! Grounded on the teacher's top-level `src/main.rs`, which parses its
//! flags with a `#[derive(Parser)]` struct rather than the hand-rolled
//! parser in `cli::args`'s sibling module — generalised here from a flat
//! mode-flag struct to a `#[derive(Subcommand)]` enum for this engine's
//! four modes (§6).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Self-improving goal-execution engine", long_about = None)]
pub struct Cli {
    /// TOML config file to load before environment-variable overrides.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the sqlite log and tool directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decompose and execute a single goal, then exit.
    Ask {
        /// Free-text goal, e.g. "list the files in /tmp".
        goal: String,
    },
    /// Run a scripted walkthrough against an in-memory store and the
    /// deterministic stub LLM backend; no network access and nothing
    /// written to disk.
    Demo,
    /// Start the HTTP surface and the autonomous background loop,
    /// and block until interrupted.
    Serve,
    /// Print a health report: execution/pathway/pattern/tool counts.
    Status,
}
