//! External command description and blocking execution.
//!
//! An interrupt (SIGINT) while a child runs is reported as [`CommandError::Interrupted`],
//! never as an ordinary failure, so callers can halt with a distinct outcome.

use nix::sys::signal::{self, SigHandler, Signal};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` failed with {status}")]
    Failed { command: String, status: String },

    #[error("`{command}` was interrupted by the operator")]
    Interrupted { command: String },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CommandError::Interrupted { .. })
    }
}

/// One external command, optionally run through an elevation program such as `sudo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    elevate: Option<String>,
    message: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            elevate: None,
            message: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix the command with `elevate`; `None` or an empty program runs it directly.
    pub fn elevated(mut self, elevate: Option<&str>) -> Self {
        self.elevate = elevate.filter(|e| !e.is_empty()).map(str::to_string);
        self
    }

    /// Progress line shown before the command.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Full argv as executed, elevation program first.
    pub fn argv(&self) -> Vec<&str> {
        self.elevate
            .iter()
            .chain(std::iter::once(&self.program))
            .chain(self.args.iter())
            .map(String::as_str)
            .collect()
    }

    fn to_process(&self) -> Command {
        let argv = self.argv();
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.argv().into_iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let needs_quotes = word.is_empty()
                || word.contains(|c: char| c.is_whitespace() || "'\"$`\\".contains(c));
            if needs_quotes {
                write!(f, "'{}'", word.replace('\'', r"'\''"))?;
            } else {
                f.write_str(word)?;
            }
        }
        Ok(())
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static HANDLER: Once = Once::new();

extern "C" fn on_sigint(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Keep this process alive on SIGINT so the interrupted child can be reported.
///
/// A handler (not `SIG_IGN`) is installed so children still get the default disposition.
pub fn install_interrupt_handler() {
    HANDLER.call_once(|| {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let installed = unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(on_sigint)) };
        if let Err(e) = installed {
            warn!("cannot install interrupt handler: {e}");
        }
    });
}

/// Whether an interrupt arrived during this invocation.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn check_status(cmd: &CommandSpec, status: ExitStatus) -> Result<(), CommandError> {
    if interrupted() || status.signal() == Some(Signal::SIGINT as i32) {
        return Err(CommandError::Interrupted {
            command: cmd.to_string(),
        });
    }
    if status.success() {
        return Ok(());
    }
    let status = match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("signal {sig}"),
        (None, None) => status.to_string(),
    };
    Err(CommandError::Failed {
        command: cmd.to_string(),
        status,
    })
}

/// Run `cmd` with inherited stdio and wait for it.
pub fn execute(cmd: &CommandSpec) -> Result<(), CommandError> {
    install_interrupt_handler();
    debug!(argv = ?cmd.argv(), "spawning");
    let status = cmd
        .to_process()
        .status()
        .map_err(|source| CommandError::Spawn {
            command: cmd.to_string(),
            source,
        })?;
    check_status(cmd, status)
}

/// Run `cmd` and return its stdout; stderr passes through to the operator.
pub fn capture(cmd: &CommandSpec) -> Result<String, CommandError> {
    install_interrupt_handler();
    debug!(argv = ?cmd.argv(), "capturing");
    let output = cmd
        .to_process()
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| CommandError::Spawn {
            command: cmd.to_string(),
            source,
        })?;
    check_status(cmd, output.status)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
