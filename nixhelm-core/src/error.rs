use crate::command::{self, CommandError};
use nixhelm_domain::{ProfileError, ResolveError};
use thiserror::Error;

/// Exit status for a run cut short by the operator.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    /// Wrap an untyped error, keeping an operator interrupt recognisable.
    ///
    /// An interrupted [`CommandError`] anywhere in the chain, or a SIGINT seen during
    /// this invocation, yields [`ToolError::Command`] instead of [`ToolError::Internal`].
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let interrupted_command = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<CommandError>())
            .find_map(|cause| match cause {
                CommandError::Interrupted { command } => Some(command.clone()),
                _ => None,
            })
            .or_else(|| command::interrupted().then(|| format!("{err:#}")));
        match interrupted_command {
            Some(command) => CommandError::Interrupted { command }.into(),
            None => ToolError::Internal(err),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ToolError::Command(e) if e.is_interrupted())
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_interrupted() {
            EXIT_INTERRUPTED
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_maps_to_130() {
        let err = ToolError::from(CommandError::Interrupted {
            command: "nix build".to_string(),
        });
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn failures_map_to_1() {
        let err = ToolError::from(CommandError::Failed {
            command: "nix build".to_string(),
            status: "exit code 1".to_string(),
        });
        assert_eq!(err.exit_code(), 1);
        assert_eq!(ToolError::from(anyhow::anyhow!("boom")).exit_code(), 1);
    }

    #[test]
    fn wrapped_interrupt_keeps_its_exit_code() {
        let err = anyhow::Error::new(CommandError::Interrupted {
            command: "nix-store --gc --print-roots".to_string(),
        })
        .context("list gc roots");

        let err = ToolError::from_anyhow(err);
        assert!(err.is_interrupted());
        assert_eq!(err.exit_code(), 130);
        assert!(err.to_string().contains("nix-store --gc --print-roots"));
    }

    #[test]
    fn wrapped_failure_stays_internal() {
        let err = anyhow::Error::new(CommandError::Failed {
            command: "nix-store --gc --print-roots".to_string(),
            status: "exit code 1".to_string(),
        })
        .context("list gc roots");

        let err = ToolError::from_anyhow(err);
        assert!(matches!(err, ToolError::Internal(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
