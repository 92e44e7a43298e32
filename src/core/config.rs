//! Configuration store: a flat TOML record with per-field default recovery.
//!
//! `load()` never fails. A missing file is created with defaults, a field
//! that cannot be parsed is replaced by its default, and an unreadable or
//! unparsable file falls back to defaults entirely. Every substitution is
//! logged as a `ConfigInvalid` / `ConfigParse` condition.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{info, warn};

use crate::core::errors::{Result, WakeError};

pub const DEFAULT_START_TIME: StartTime = StartTime { hour: 2, minute: 0 };
pub const DEFAULT_NOTIFICATION_DURATION_SECS: u64 = 60;
pub const DEFAULT_NOTIFICATION_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_LISTENER_PORT: u16 = 8888;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 15;

const CONFIG_FILE_NAME: &str = "config.toml";
const SENTINEL_FILE_NAME: &str = "click.flag";
const AUDIT_LOG_FILE_NAME: &str = "wake_log.jsonl";

// ──────────────────── start time ────────────────────

/// Wall-clock `HH:MM` (24h) at which monitoring begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StartTime {
    hour: u8,
    minute: u8,
}

impl StartTime {
    #[must_use]
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// Whether `now` falls inside this start minute.
    #[must_use]
    pub fn matches(self, now: NaiveDateTime) -> bool {
        now.hour() == u32::from(self.hour) && now.minute() == u32::from(self.minute)
    }

    /// Time from `now` until the next occurrence of this start time.
    ///
    /// When the start time has already passed today the target is tomorrow.
    #[must_use]
    pub fn until_next(self, now: NaiveDateTime) -> Duration {
        let Some(time) = NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
        else {
            return Duration::ZERO;
        };
        let mut target = now.date().and_time(time);
        if now > target {
            target += chrono::Duration::days(1);
        }
        (target - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for StartTime {
    type Err = WakeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || WakeError::ConfigInvalid {
            details: format!("start time `{s}` is not HH:MM (24h)"),
        };
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse_part = |part: &str| {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u8>().ok()
        };
        let hour = parse_part(hour).ok_or_else(invalid)?;
        let minute = parse_part(minute).ok_or_else(invalid)?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for StartTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StartTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ──────────────────── config record ────────────────────

/// The flat settings record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub start_time: StartTime,
    /// Seconds to wait for a confirmation before shutting down. Must be > 0.
    pub notification_duration: u64,
    /// Seconds to sleep after a confirmation before asking again.
    pub notification_interval: u64,
    pub listener_port: u16,
    /// OS-level delay handed to the shutdown command.
    pub shutdown_grace_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_time: DEFAULT_START_TIME,
            notification_duration: DEFAULT_NOTIFICATION_DURATION_SECS,
            notification_interval: DEFAULT_NOTIFICATION_INTERVAL_SECS,
            listener_port: DEFAULT_LISTENER_PORT,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            sentinel_file: None,
            audit_log: None,
        }
    }
}

impl Config {
    #[must_use]
    pub const fn notification_duration(&self) -> Duration {
        Duration::from_secs(self.notification_duration)
    }

    #[must_use]
    pub const fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_interval)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Strict validation used before saving edited settings.
    pub fn validate(&self) -> Result<()> {
        if self.notification_duration == 0 {
            return Err(WakeError::ConfigInvalid {
                details: "notification_duration must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Build a config from a parsed table, substituting defaults per field.
    ///
    /// Returns the config together with every condition that was recovered.
    #[must_use]
    pub fn from_table(table: toml::Table) -> (Self, Vec<WakeError>) {
        let mut config = Self::default();
        let mut issues = Vec::new();

        for (key, value) in table {
            match key.as_str() {
                "start_time" => read_field(&mut config.start_time, &key, value, &mut issues),
                "notification_duration" => {
                    read_field(&mut config.notification_duration, &key, value, &mut issues);
                }
                "notification_interval" => {
                    read_field(&mut config.notification_interval, &key, value, &mut issues);
                }
                "listener_port" => read_field(&mut config.listener_port, &key, value, &mut issues),
                "shutdown_grace_secs" => {
                    read_field(&mut config.shutdown_grace_secs, &key, value, &mut issues);
                }
                "sentinel_file" => read_field(&mut config.sentinel_file, &key, value, &mut issues),
                "audit_log" => read_field(&mut config.audit_log, &key, value, &mut issues),
                _ => issues.push(WakeError::ConfigInvalid {
                    details: format!("unknown key `{key}` ignored"),
                }),
            }
        }

        if config.notification_duration == 0 {
            issues.push(WakeError::ConfigInvalid {
                details: format!(
                    "notification_duration must be greater than zero; using {DEFAULT_NOTIFICATION_DURATION_SECS}"
                ),
            });
            config.notification_duration = DEFAULT_NOTIFICATION_DURATION_SECS;
        }

        (config, issues)
    }
}

fn read_field<T: DeserializeOwned>(
    slot: &mut T,
    key: &str,
    value: toml::Value,
    issues: &mut Vec<WakeError>,
) {
    match value.try_into::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(err) => issues.push(WakeError::ConfigInvalid {
            details: format!("field `{key}`: {err}; using default"),
        }),
    }
}

// ──────────────────── store ────────────────────

/// File-backed configuration store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform config dir>/wakecheck/config.toml`, or `./config.toml`.
    #[must_use]
    pub fn default_location() -> Self {
        let path = dirs::config_dir().map_or_else(
            || PathBuf::from(CONFIG_FILE_NAME),
            |dir| dir.join("wakecheck").join(CONFIG_FILE_NAME),
        );
        Self::new(path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn resolve(&self, configured: Option<&Path>, default_name: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.base_dir().join(path),
            None => self.base_dir().join(default_name),
        }
    }

    /// Sentinel flag file written by the confirmation helper.
    #[must_use]
    pub fn sentinel_file(&self, config: &Config) -> PathBuf {
        self.resolve(config.sentinel_file.as_deref(), SENTINEL_FILE_NAME)
    }

    /// JSONL audit log of confirmations and cycle outcomes.
    #[must_use]
    pub fn audit_log(&self, config: &Config) -> PathBuf {
        self.resolve(config.audit_log.as_deref(), AUDIT_LOG_FILE_NAME)
    }

    /// Load the config, recovering every failure with defaults.
    pub fn load(&self) -> Config {
        match self.try_load() {
            Ok((config, issues)) => {
                for issue in issues {
                    warn!(code = issue.code(), path = %self.path.display(), "{issue}");
                }
                config
            }
            Err(err) => {
                warn!(
                    code = err.code(),
                    path = %self.path.display(),
                    "{err}; using default configuration"
                );
                Config::default()
            }
        }
    }

    /// Load the config, surfacing IO failures and listing recovered issues.
    ///
    /// A missing file is created with the default record.
    pub fn try_load(&self) -> Result<(Config, Vec<WakeError>)> {
        if !self.path.exists() {
            let config = Config::default();
            self.save(&config)?;
            info!(path = %self.path.display(), "created default configuration");
            return Ok((config, Vec::new()));
        }

        let text =
            std::fs::read_to_string(&self.path).map_err(|err| WakeError::io(&self.path, err))?;
        match toml::from_str::<toml::Table>(&text) {
            Ok(table) => Ok(Config::from_table(table)),
            Err(err) => Ok((Config::default(), vec![WakeError::from(err)])),
        }
    }

    /// Write `config` as pretty TOML, creating parent directories.
    pub fn save(&self, config: &Config) -> Result<()> {
        let text = toml::to_string_pretty(config)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| WakeError::io(parent, err))?;
        }
        std::fs::write(&self.path, text).map_err(|err| WakeError::io(&self.path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .expect("valid fixture time")
    }

    #[test]
    fn start_time_parses_and_displays_padded() {
        let t: StartTime = "2:05".parse().expect("valid start time");
        assert_eq!((t.hour(), t.minute()), (2, 5));
        assert_eq!(t.to_string(), "02:05");
    }

    #[test]
    fn start_time_rejects_malformed_input() {
        for bad in ["", "02", "24:00", "12:60", "ab:cd", "1:2:3", "-1:00", "123:00"] {
            assert!(bad.parse::<StartTime>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn start_time_match_is_minute_granular() {
        let t = DEFAULT_START_TIME;
        assert!(t.matches(at(2, 0, 0)));
        assert!(t.matches(at(2, 0, 59)));
        assert!(!t.matches(at(2, 1, 0)));
        assert!(!t.matches(at(1, 59, 59)));
    }

    #[test]
    fn until_next_rolls_over_to_tomorrow() {
        let t = DEFAULT_START_TIME;
        assert_eq!(t.until_next(at(1, 59, 0)), Duration::from_secs(60));
        assert_eq!(t.until_next(at(2, 0, 0)), Duration::ZERO);
        assert_eq!(
            t.until_next(at(2, 0, 1)),
            Duration::from_secs(24 * 3600 - 1)
        );
    }

    #[test]
    fn load_creates_default_file_when_absent() {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("nested").join("config.toml"));
        let config = store.load();
        assert_eq!(config, Config::default());
        assert!(store.path().exists());

        let text = std::fs::read_to_string(store.path()).expect("read back");
        assert!(text.contains("start_time = \"02:00\""));
        assert!(text.contains("notification_duration = 60"));
        assert!(text.contains("notification_interval = 600"));
    }

    #[test]
    fn malformed_field_falls_back_to_its_default_only() {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.toml"));
        std::fs::write(
            store.path(),
            "start_time = \"25:99\"\nnotification_duration = 5\nnotification_interval = \"soon\"\n",
        )
        .expect("write fixture");

        let (config, issues) = store.try_load().expect("readable");
        assert_eq!(config.start_time, DEFAULT_START_TIME);
        assert_eq!(config.notification_duration, 5);
        assert_eq!(config.notification_interval, DEFAULT_NOTIFICATION_INTERVAL_SECS);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.code() == "WCK-1001"));
    }

    #[test]
    fn zero_duration_is_replaced() {
        let table: toml::Table = toml::from_str("notification_duration = 0").expect("toml");
        let (config, issues) = Config::from_table(table);
        assert_eq!(config.notification_duration, DEFAULT_NOTIFICATION_DURATION_SECS);
        assert_eq!(issues.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unparsable_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.toml"));
        std::fs::write(store.path(), "{ not toml").expect("write fixture");
        let (config, issues) = store.try_load().expect("readable");
        assert_eq!(config, Config::default());
        assert_eq!(issues[0].code(), "WCK-1002");
    }

    #[test]
    fn save_then_load_preserves_edits() {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let edited = Config {
            start_time: StartTime::new(23, 30).expect("valid"),
            notification_duration: 90,
            notification_interval: 1200,
            listener_port: 9999,
            shutdown_grace_secs: 0,
            sentinel_file: Some(PathBuf::from("flags/awake.flag")),
            audit_log: None,
        };
        store.save(&edited).expect("save");
        let (loaded, issues) = store.try_load().expect("load");
        assert!(issues.is_empty());
        assert_eq!(loaded, edited);
    }

    #[test]
    fn side_files_resolve_against_config_dir() {
        let store = ConfigStore::new("/etc/wakecheck/config.toml");
        let mut config = Config::default();
        assert_eq!(
            store.sentinel_file(&config),
            PathBuf::from("/etc/wakecheck/click.flag")
        );
        assert_eq!(
            store.audit_log(&config),
            PathBuf::from("/etc/wakecheck/wake_log.jsonl")
        );

        config.sentinel_file = Some(PathBuf::from("flags/awake.flag"));
        config.audit_log = Some(PathBuf::from("/var/log/wake.jsonl"));
        assert_eq!(
            store.sentinel_file(&config),
            PathBuf::from("/etc/wakecheck/flags/awake.flag")
        );
        assert_eq!(store.audit_log(&config), PathBuf::from("/var/log/wake.jsonl"));
    }

    #[test]
    fn validate_rejects_zero_duration() {
        let config = Config {
            notification_duration: 0,
            ..Config::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), "WCK-1001");
    }

    proptest! {
        #[test]
        fn every_valid_clock_time_parses(hour in 0u8..24, minute in 0u8..60) {
            let parsed: StartTime = format!("{hour:02}:{minute:02}").parse().expect("valid");
            prop_assert_eq!((parsed.hour(), parsed.minute()), (hour, minute));
        }

        #[test]
        fn out_of_range_times_are_rejected(hour in 24u8..100, minute in 60u8..100) {
            let bad_hour = format!("{hour}:00").parse::<StartTime>();
            let bad_minute = format!("00:{minute}").parse::<StartTime>();
            prop_assert!(bad_hour.is_err());
            prop_assert!(bad_minute.is_err());
        }
    }
}
