//! Confirmation signal aggregator.
//!
//! One logical "user is awake" bit fed by several independent producers
//! (loopback callback, tray menu, helper-written sentinel file) plus a
//! monotonic stop request. The monitoring cycle is the only consumer and the
//! only caller of [`ConfirmationSignals::reset`].
//!
//! Confirmations are idempotent: the first source of a phase is remembered
//! for the audit trail and later ones are no-ops. The sentinel file needs no
//! explicit call, since its mere existence counts as a `file` confirmation the
//! next time the state is read.

#![allow(missing_docs)]

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::errors::{Result, WakeError};

/// Contents written into the sentinel file by the confirmation helper.
pub const SENTINEL_CONTENTS: &str = "awake";

/// Producer that delivered a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmSource {
    /// `GET` on the loopback listener's confirm path.
    Callback,
    /// "I'm Awake" chosen from the tray menu.
    Tray,
    /// Sentinel file written by the helper process.
    File,
}

impl fmt::Display for ConfirmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Callback => "callback",
            Self::Tray => "tray",
            Self::File => "file",
        })
    }
}

/// Shared confirmation + cancellation state.
///
/// All methods take `&self` and are safe to call from any thread; share it
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct ConfirmationSignals {
    /// First source that confirmed the current phase; `None` while pending.
    confirmed_by: Mutex<Option<ConfirmSource>>,
    stop_requested: AtomicBool,
    sentinel: Option<PathBuf>,
}

impl ConfirmationSignals {
    /// Signals without a sentinel-file channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that also treat the existence of `sentinel` as a confirmation.
    #[must_use]
    pub fn with_sentinel(sentinel: impl Into<PathBuf>) -> Self {
        Self {
            sentinel: Some(sentinel.into()),
            ..Self::default()
        }
    }

    /// Clear the signal back to pending and delete any stale sentinel file.
    pub fn reset(&self) {
        let mut confirmed_by = self.confirmed_by.lock();
        *confirmed_by = None;
        if let Some(sentinel) = &self.sentinel {
            match std::fs::remove_file(sentinel) {
                Ok(()) => debug!(path = %sentinel.display(), "removed stale sentinel file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let err = WakeError::io(sentinel, err);
                    warn!(code = err.code(), "could not clear sentinel file: {err}");
                }
            }
        }
    }

    /// Mark the current phase confirmed by `source`.
    ///
    /// Returns `true` only for the call that moved the signal from pending to
    /// confirmed.
    pub fn confirm(&self, source: ConfirmSource) -> bool {
        let mut confirmed_by = self.confirmed_by.lock();
        if let Some(first) = *confirmed_by {
            debug!(%source, %first, "confirmation already recorded");
            return false;
        }
        *confirmed_by = Some(source);
        info!(%source, "user confirmed awake");
        true
    }

    /// Non-blocking read; a present sentinel file confirms implicitly.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_by().is_some()
    }

    /// Source that confirmed the current phase, if any.
    #[must_use]
    pub fn confirmed_by(&self) -> Option<ConfirmSource> {
        let mut confirmed_by = self.confirmed_by.lock();
        if confirmed_by.is_none() && self.sentinel.as_deref().is_some_and(Path::exists) {
            *confirmed_by = Some(ConfirmSource::File);
            info!(source = %ConfirmSource::File, "user confirmed awake");
        }
        *confirmed_by
    }

    /// Ask every suspension point to wind down. Never reverts.
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("stop requested");
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Write the sentinel file the way the notification helper does.
pub fn write_sentinel(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| WakeError::io(parent, err))?;
    }
    std::fs::write(path, SENTINEL_CONTENTS).map_err(|err| WakeError::io(path, err))
}
