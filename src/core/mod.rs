//! Core primitives shared by every subsystem: errors, configuration, clock.

pub mod clock;
pub mod config;
pub mod errors;
