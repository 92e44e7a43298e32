//! Power-off request. Fired at most once per monitor run and never retried.

#![allow(missing_docs)]

use std::process::Command;
use std::time::Duration;

use tracing::warn;

use crate::core::errors::{Result, WakeError};

/// Issues the irreversible shutdown request.
pub trait ShutdownAction: Send + Sync {
    fn invoke(&self) -> Result<()>;
}

/// Calls the OS `shutdown` command with a grace delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemShutdown {
    grace: Duration,
}

impl SystemShutdown {
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Program and arguments for this platform.
    #[must_use]
    pub fn command_line(&self) -> (&'static str, Vec<String>) {
        if cfg!(target_os = "windows") {
            windows_args(self.grace)
        } else {
            unix_args(self.grace)
        }
    }
}

fn windows_args(grace: Duration) -> (&'static str, Vec<String>) {
    (
        "shutdown",
        vec!["/s".to_string(), "/t".to_string(), grace.as_secs().to_string()],
    )
}

/// Unix `shutdown` only takes whole minutes, so the grace rounds up.
fn unix_args(grace: Duration) -> (&'static str, Vec<String>) {
    let when = match grace.as_secs() {
        0 => "now".to_string(),
        secs => format!("+{}", secs.div_ceil(60)),
    };
    ("shutdown", vec!["-h".to_string(), when])
}

impl ShutdownAction for SystemShutdown {
    fn invoke(&self) -> Result<()> {
        let (program, args) = self.command_line();
        warn!(program, ?args, "requesting system shutdown");
        let status = Command::new(program)
            .args(&args)
            .status()
            .map_err(|err| WakeError::ShutdownFailed {
                details: format!("could not run {program}: {err}"),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(WakeError::ShutdownFailed {
                details: format!("{program} exited with {status}"),
            })
        }
    }
}

/// Logs instead of powering off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunShutdown;

impl ShutdownAction for DryRunShutdown {
    fn invoke(&self) -> Result<()> {
        warn!("dry run: system shutdown would be requested now");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_passes_grace_in_seconds() {
        let (program, args) = windows_args(Duration::from_secs(15));
        assert_eq!(program, "shutdown");
        assert_eq!(args, ["/s", "/t", "15"]);
    }

    #[test]
    fn unix_rounds_grace_up_to_minutes() {
        assert_eq!(unix_args(Duration::ZERO).1, ["-h", "now"]);
        assert_eq!(unix_args(Duration::from_secs(15)).1, ["-h", "+1"]);
        assert_eq!(unix_args(Duration::from_secs(60)).1, ["-h", "+1"]);
        assert_eq!(unix_args(Duration::from_secs(61)).1, ["-h", "+2"]);
    }

    #[test]
    fn dry_run_succeeds_without_side_effects() {
        assert!(DryRunShutdown.invoke().is_ok());
    }
}
