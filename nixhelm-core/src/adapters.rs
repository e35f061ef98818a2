use crate::command::{self, CommandError, CommandSpec};
use crate::ports::{CommandRunner, Confirm};
use anyhow::Context;
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use nixhelm_domain::{StoreView, parse_registration_time};
use tracing::info;

/// Process-backed runner. In dry-run mode commands are announced but never spawned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    pub dry_run: bool,
}

impl ProcessRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<(), CommandError> {
        if let Some(message) = cmd.get_message() {
            info!("{message}");
        }
        info!("$ {cmd}");
        if self.dry_run {
            return Ok(());
        }
        command::execute(cmd)
    }
}

/// Store view backed by `nix-store --gc --print-roots` and `nix path-info --json`.
#[derive(Debug, Clone)]
pub struct NixStore {
    nix: String,
    nix_store: String,
}

impl NixStore {
    pub fn new(nix: impl Into<String>, nix_store: impl Into<String>) -> Self {
        Self {
            nix: nix.into(),
            nix_store: nix_store.into(),
        }
    }
}

impl StoreView for NixStore {
    fn list_roots(&self) -> anyhow::Result<String> {
        let cmd = CommandSpec::new(&self.nix_store).args(["--gc", "--print-roots"]);
        Ok(command::capture(&cmd)?)
    }

    fn registration_time(&self, target: &Utf8Path) -> anyhow::Result<DateTime<Utc>> {
        let cmd = CommandSpec::new(&self.nix).args(["path-info", "--json", target.as_str()]);
        let json = command::capture(&cmd)?;
        parse_registration_time(&json, target)
            .with_context(|| format!("read registration time of {target}"))
    }
}

/// Interactive terminal prompt; the default answer is "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> anyhow::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(prompt_error)
    }
}

/// Ctrl-C at the prompt reads as an interrupt, like SIGINT during a command.
fn prompt_error(err: dialoguer::Error) -> anyhow::Error {
    match err {
        dialoguer::Error::IO(e) if e.kind() == std::io::ErrorKind::Interrupted => {
            anyhow::Error::new(CommandError::Interrupted {
                command: "confirmation prompt".to_string(),
            })
        }
        other => anyhow::Error::new(other).context("read confirmation from terminal"),
    }
}

/// Fixed answer, for non-interactive embedders.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, prompt: &str) -> anyhow::Result<bool> {
        info!("{prompt} {}", if self.0 { "yes" } else { "no" });
        Ok(self.0)
    }
}
