//! WCK-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WakeError>;

/// Top-level error type for the wake check.
#[derive(Debug, Error)]
pub enum WakeError {
    #[error("[WCK-1001] invalid configuration: {details}")]
    ConfigInvalid { details: String },

    #[error("[WCK-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WCK-2001] loopback port {addr} unavailable: {source}")]
    PortUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("[WCK-2002] notification could not be shown: {details}")]
    NotificationFailed { details: String },

    #[error("[WCK-2003] shutdown request failed: {details}")]
    ShutdownFailed { details: String },

    #[error("[WCK-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WCK-3002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WCK-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WakeError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "WCK-1001",
            Self::ConfigParse { .. } => "WCK-1002",
            Self::PortUnavailable { .. } => "WCK-2001",
            Self::NotificationFailed { .. } => "WCK-2002",
            Self::ShutdownFailed { .. } => "WCK-2003",
            Self::Io { .. } => "WCK-3001",
            Self::Serialization { .. } => "WCK-3002",
            Self::Runtime { .. } => "WCK-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for WakeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for WakeError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for WakeError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
