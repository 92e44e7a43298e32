//! Daemon subsystem: monitoring cycle, confirmation signals, loopback
//! listener, tray surface and OS-signal bridge.

pub mod confirmation;
pub mod listener;
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod surface;
