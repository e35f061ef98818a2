//! Port traits for the side effects the pipelines perform.

use crate::command::{CommandError, CommandSpec};

/// Runs external commands on behalf of a pipeline.
pub trait CommandRunner {
    /// Announce `cmd`, then run it to completion unless the runner is in dry-run mode.
    fn run(&self, cmd: &CommandSpec) -> Result<(), CommandError>;
}

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> anyhow::Result<bool>;
}
