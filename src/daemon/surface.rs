//! Tray/menu surface: the two inbound calls a tray icon makes into the core.
//!
//! The icon itself lives outside this crate. Whatever hosts it (a desktop
//! tray, the OS-signal bridge in [`crate::daemon::signals`], a test) holds a
//! [`TrayMenu`] and calls it from its own event-dispatch thread.

use std::sync::Arc;

use tracing::info;

use crate::daemon::confirmation::{ConfirmSource, ConfirmationSignals};

/// Handle for the tray menu's "I'm Awake" and "Exit" items.
#[derive(Debug, Clone)]
pub struct TrayMenu {
    signals: Arc<ConfirmationSignals>,
}

impl TrayMenu {
    #[must_use]
    pub fn new(signals: Arc<ConfirmationSignals>) -> Self {
        Self { signals }
    }

    /// "I'm Awake" clicked.
    pub fn awake_clicked(&self) {
        info!("tray: I'm Awake");
        self.signals.confirm(ConfirmSource::Tray);
    }

    /// "Exit" clicked.
    pub fn exit(&self) {
        info!("tray: Exit");
        self.signals.request_stop();
    }
}
