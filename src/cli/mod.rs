//! CLI module — argument parsing and mode dispatch.
//!
//! Grounded on the teacher's `src/cli/mod.rs` shape (module re-exports,
//! a `thiserror` `Error` enum, and deterministic exit codes), generalised
//! from the teacher's tui/plan/execute/evidence modes to this engine's
//! `ask`/`demo`/`serve`/`status` modes (§6).

pub mod args;
pub mod dispatch;

pub use args::{Cli, Command};
pub use dispatch::run;

/// CLI errors surfaced before the engine itself is reachable (argument
/// parsing, config loading). Engine-level failures are reported through
/// `dispatch::run`'s own exit-code mapping instead of this enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Exit codes. The teacher's distinct `EXIT_DB_ERROR`/`EXIT_FAILURE`
/// collapse here to a single "operational failure" class; a new
/// `EXIT_CONFIG_ERROR` is added for failures before the engine starts.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 3;
