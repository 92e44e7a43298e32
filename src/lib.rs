//! Wake check: a dead-man's switch for an unattended machine.
//!
//! At a configured time the monitor asks the user to confirm they are awake.
//! A confirmation arrives through any of three channels (the notification's
//! loopback callback, the tray/signal menu, or a sentinel file written by
//! `wakecheck confirm`). If none arrives within the configured duration the
//! machine is powered off; otherwise the monitor sleeps for the configured
//! interval and asks again.

pub mod core;
pub mod daemon;
pub mod logger;
pub mod platform;

#[cfg(feature = "cli")]
pub mod cli_app;
