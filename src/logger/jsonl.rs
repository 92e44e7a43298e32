//! JSONL audit log with graceful degradation.
//!
//! One JSON object per line. A failed write is reported through `tracing`
//! and otherwise ignored: losing an audit line must never interrupt the
//! monitoring cycle.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::errors::{Result, WakeError};
use crate::daemon::confirmation::ConfirmSource;

/// Something worth keeping a durable trace of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    MonitorStarted { start_time: String },
    NotificationShown { cycle: u32 },
    NotificationFailed { cycle: u32, error: String },
    ListenerUnavailable { cycle: u32, error: String },
    Confirmed { cycle: u32, source: ConfirmSource },
    HelperConfirmed { sentinel: PathBuf },
    ShutdownInvoked { cycle: u32 },
    ShutdownFailed { cycle: u32, error: String },
    Stopped { cycle: u32 },
}

/// A single line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Local>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Append-only JSONL writer.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// A log that drops every event (tests, `--dry-run` without a log path).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` stamped with the current local time.
    pub fn record(&self, event: AuditEvent) {
        let entry = AuditEntry {
            ts: Local::now(),
            event,
        };
        if let Err(err) = self.append(&entry) {
            warn!(code = err.code(), path = %self.path.display(), "audit write failed: {err}");
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| WakeError::io(&self.path, err))
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| WakeError::io(parent, err))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| WakeError::io(path, err))
}

/// Read every parseable entry from a log file, skipping corrupt lines.
pub fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let text = std::fs::read_to_string(path).map_err(|err| WakeError::io(path, err))?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_are_appended_as_tagged_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("logs").join("wake_log.jsonl");
        let log = AuditLog::open(&path).expect("open");

        log.record(AuditEvent::NotificationShown { cycle: 1 });
        log.record(AuditEvent::Confirmed {
            cycle: 1,
            source: ConfirmSource::Tray,
        });

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"notification_shown\""));
        assert!(lines[1].contains("\"source\":\"tray\""));

        let entries = read_entries(&path).expect("parse");
        assert_eq!(
            entries[1].event,
            AuditEvent::Confirmed {
                cycle: 1,
                source: ConfirmSource::Tray
            }
        );
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("wake_log.jsonl");
        AuditLog::open(&path)
            .expect("open")
            .record(AuditEvent::Stopped { cycle: 0 });
        AuditLog::open(&path)
            .expect("reopen")
            .record(AuditEvent::Stopped { cycle: 3 });
        assert_eq!(read_entries(&path).expect("parse").len(), 2);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("wake_log.jsonl");
        let log = AuditLog::open(&path).expect("open");
        log.record(AuditEvent::ShutdownInvoked { cycle: 2 });
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(b"{truncated\n"))
            .expect("append garbage");
        assert_eq!(read_entries(&path).expect("parse").len(), 1);
    }

    #[test]
    fn disabled_log_accepts_events() {
        let log = AuditLog::disabled();
        log.record(AuditEvent::Stopped { cycle: 0 });
        assert_eq!(log.path(), Path::new(""));
    }
}
