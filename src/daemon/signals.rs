//! OS-signal bridge: drives the tray surface when running headless.
//!
//! Unix: `SIGUSR1` means "I'm Awake"; `SIGINT`, `SIGTERM` and `SIGHUP` mean
//! "Exit". Elsewhere only `SIGINT`/`SIGTERM` are watched, through flags
//! polled by a small thread.

#![allow(missing_docs)]

use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::core::errors::{Result, WakeError};
use crate::daemon::surface::TrayMenu;

/// Running bridge. Dropping it unregisters the handlers and joins the thread.
pub struct SignalBridge {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
    #[cfg(not(unix))]
    closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

fn runtime_error(context: &str, err: &std::io::Error) -> WakeError {
    WakeError::Runtime {
        details: format!("{context}: {err}"),
    }
}

impl SignalBridge {
    #[cfg(unix)]
    pub fn install(tray: TrayMenu) -> Result<Self> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGUSR1, SIGINT, SIGTERM, SIGHUP])
            .map_err(|err| runtime_error("registering signal handlers", &err))?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("wakecheck-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    debug!(signal, "signal received");
                    if signal == SIGUSR1 {
                        tray.awake_clicked();
                    } else {
                        tray.exit();
                    }
                }
            })
            .map_err(|err| runtime_error("spawning signal thread", &err))?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    #[cfg(not(unix))]
    pub fn install(tray: TrayMenu) -> Result<Self> {
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let terminate = Arc::new(AtomicBool::new(false));
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&terminate))
                .map_err(|err| runtime_error("registering signal handlers", &err))?;
        }
        let closed = Arc::new(AtomicBool::new(false));
        let watcher_closed = Arc::clone(&closed);
        let thread = thread::Builder::new()
            .name("wakecheck-signals".to_string())
            .spawn(move || {
                while !watcher_closed.load(Ordering::SeqCst) {
                    if terminate.swap(false, Ordering::SeqCst) {
                        tray.exit();
                    }
                    thread::sleep(Duration::from_millis(200));
                }
            })
            .map_err(|err| runtime_error("spawning signal thread", &err))?;

        Ok(Self {
            closed,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.handle.close();
        #[cfg(not(unix))]
        self.closed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal thread panicked");
            }
        }
    }
}
