//! Monitoring cycle: wait for the start time, then notify → poll → branch
//! until the user stops confirming or a stop is requested.
//!
//! ```text
//! WaitingForStart ─▶ NotifyAndArm ─▶ Polling ─┬─▶ ConfirmedSleep ─▶ NotifyAndArm …
//!        │                              │     └─▶ UnconfirmedShutdown ─▶ Stopped
//!        └──────────────▶ Stopped ◀─────┘ (stop observed at any suspension point)
//! ```
//!
//! Every suspension is chunked (≤ 20 s while waiting for the start time,
//! 1 s while polling or sleeping) so a stop request is observed with bounded
//! latency. Within one polling tick a confirmation beats a stop request, and
//! a stop request beats the duration running out.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::config::{Config, StartTime};
use crate::daemon::confirmation::{ConfirmSource, ConfirmationSignals};
use crate::daemon::listener::{ListenerConfig, ListenerEvent, ListenerSession};
use crate::logger::jsonl::{AuditEvent, AuditLog};
use crate::platform::notify::{NotificationPresenter, WakeNotification};
use crate::platform::shutdown::ShutdownAction;

/// Longest single sleep while waiting for the start time.
pub const START_WAIT_CHUNK: Duration = Duration::from_secs(20);
/// Polling and interval-sleep granularity.
pub const TICK: Duration = Duration::from_secs(1);

/// Where the cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    WaitingForStart,
    NotifyAndArm,
    Polling,
    ConfirmedSleep,
    UnconfirmedShutdown,
    Stopped,
}

/// Why the monitor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A stop request was observed.
    Stopped,
    /// Nobody confirmed in time and the shutdown action was invoked.
    ShutdownInvoked,
    /// Nobody confirmed in time and the shutdown action failed. Not retried.
    ShutdownFailed,
}

/// What happened over the monitor's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub outcome: MonitorOutcome,
    /// Number of notify-and-wait phases entered.
    pub cycles: u32,
    /// Confirming source of each confirmed phase, in order.
    pub confirmations: Vec<ConfirmSource>,
    /// Every state entered, in order.
    pub transitions: Vec<CycleState>,
}

/// Outcome of a single polling phase.
enum PhaseOutcome {
    Confirmed(ConfirmSource),
    Stopped,
    TimedOut,
}

/// Runtime knobs that are not part of the persisted config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorOptions {
    /// Override the configured start time for this run.
    pub start_at: Option<StartTime>,
    /// Skip the start-time wait entirely.
    pub start_now: bool,
}

/// The monitoring cycle and the collaborators it drives.
pub struct Monitor {
    config: Config,
    options: MonitorOptions,
    listener: ListenerConfig,
    signals: Arc<ConfirmationSignals>,
    clock: Arc<dyn Clock>,
    presenter: Box<dyn NotificationPresenter>,
    shutdown: Box<dyn ShutdownAction>,
    audit: Arc<AuditLog>,
    report: MonitorReport,
}

impl Monitor {
    #[must_use]
    pub fn new(
        config: Config,
        signals: Arc<ConfirmationSignals>,
        clock: Arc<dyn Clock>,
        presenter: Box<dyn NotificationPresenter>,
        shutdown: Box<dyn ShutdownAction>,
    ) -> Self {
        let listener = ListenerConfig::loopback(config.listener_port);
        Self {
            config,
            options: MonitorOptions::default(),
            listener,
            signals,
            clock,
            presenter,
            shutdown,
            audit: Arc::new(AuditLog::disabled()),
            report: MonitorReport {
                outcome: MonitorOutcome::Stopped,
                cycles: 0,
                confirmations: Vec::new(),
                transitions: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }

    /// Shared signals, for wiring additional producers.
    #[must_use]
    pub fn signals(&self) -> Arc<ConfirmationSignals> {
        Arc::clone(&self.signals)
    }

    /// Run until stopped or until a shutdown was attempted.
    pub fn run(mut self) -> MonitorReport {
        let start_time = self.options.start_at.unwrap_or(self.config.start_time);
        self.audit.record(AuditEvent::MonitorStarted {
            start_time: start_time.to_string(),
        });

        let outcome = if self.options.start_now || self.wait_for_start(start_time) {
            self.cycle_until_done()
        } else {
            MonitorOutcome::Stopped
        };

        self.enter(CycleState::Stopped);
        if outcome == MonitorOutcome::Stopped {
            self.audit.record(AuditEvent::Stopped {
                cycle: self.report.cycles,
            });
        }
        self.report.outcome = outcome;
        info!(outcome = ?outcome, cycles = self.report.cycles, "monitor finished");
        self.report
    }

    fn enter(&mut self, state: CycleState) {
        debug!(?state, cycle = self.report.cycles, "state transition");
        self.report.transitions.push(state);
    }

    /// Returns `false` when a stop was requested before the start time.
    fn wait_for_start(&mut self, start_time: StartTime) -> bool {
        self.enter(CycleState::WaitingForStart);
        info!(%start_time, "waiting for start time");
        loop {
            if self.signals.is_stopped() {
                return false;
            }
            let now = self.clock.now_local();
            if start_time.matches(now) {
                return true;
            }
            let chunk = start_time.until_next(now).clamp(TICK, START_WAIT_CHUNK);
            self.clock.sleep(chunk);
        }
    }

    fn cycle_until_done(&mut self) -> MonitorOutcome {
        loop {
            self.report.cycles += 1;
            let cycle = self.report.cycles;

            match self.notify_and_poll(cycle) {
                PhaseOutcome::Confirmed(source) => {
                    self.report.confirmations.push(source);
                    self.audit.record(AuditEvent::Confirmed { cycle, source });
                    self.enter(CycleState::ConfirmedSleep);
                    info!(
                        %source,
                        interval_secs = self.config.notification_interval,
                        "confirmed; sleeping before next check"
                    );
                    if !self.sleep_interval() {
                        return MonitorOutcome::Stopped;
                    }
                }
                PhaseOutcome::Stopped => return MonitorOutcome::Stopped,
                PhaseOutcome::TimedOut => {
                    self.enter(CycleState::UnconfirmedShutdown);
                    return self.invoke_shutdown(cycle);
                }
            }
        }
    }

    /// One notify-and-wait phase. The listener is released before returning.
    fn notify_and_poll(&mut self, cycle: u32) -> PhaseOutcome {
        self.enter(CycleState::NotifyAndArm);
        // Cleared before any producer of this phase is armed.
        self.signals.reset();

        let session = match ListenerSession::start(&self.listener, Arc::clone(&self.signals)) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(
                    code = err.code(),
                    "{err}; continuing without the callback channel"
                );
                self.audit.record(AuditEvent::ListenerUnavailable {
                    cycle,
                    error: err.to_string(),
                });
                None
            }
        };

        // The bound address, so an ephemeral port still yields a working URL.
        let confirm_url = session.as_ref().map_or_else(
            || self.listener.confirm_url(),
            |session| {
                ListenerConfig {
                    addr: session.local_addr(),
                }
                .confirm_url()
            },
        );
        let notification =
            WakeNotification::new(self.config.notification_duration(), confirm_url);
        match self.presenter.show(&notification) {
            Ok(()) => {
                info!(cycle, "notification shown; waiting for confirmation");
                self.audit.record(AuditEvent::NotificationShown { cycle });
            }
            Err(err) => {
                warn!(code = err.code(), "{err}; tray and sentinel channels remain");
                self.audit.record(AuditEvent::NotificationFailed {
                    cycle,
                    error: err.to_string(),
                });
            }
        }

        self.enter(CycleState::Polling);
        let outcome = self.poll(session.as_ref());
        if let Some(session) = session {
            session.stop_and_release();
        }
        outcome
    }

    fn poll(&self, session: Option<&ListenerSession>) -> PhaseOutcome {
        let duration = self.config.notification_duration();
        let began = self.clock.monotonic();
        loop {
            if let Some(session) = session {
                while let Some(event) = session.poll_or_timeout(Duration::ZERO) {
                    if let ListenerEvent::Ignored { method, path } = event {
                        debug!(%method, %path, "loopback request ignored");
                    }
                }
            }
            if let Some(source) = self.signals.confirmed_by() {
                return PhaseOutcome::Confirmed(source);
            }
            if self.signals.is_stopped() {
                return PhaseOutcome::Stopped;
            }
            if self.clock.monotonic().saturating_sub(began) >= duration {
                return PhaseOutcome::TimedOut;
            }
            self.clock.sleep(TICK);
        }
    }

    /// Returns `false` when a stop interrupted the sleep.
    fn sleep_interval(&self) -> bool {
        let interval = self.config.notification_interval();
        let began = self.clock.monotonic();
        loop {
            if self.signals.is_stopped() {
                return false;
            }
            let slept = self.clock.monotonic().saturating_sub(began);
            if slept >= interval {
                return true;
            }
            self.clock.sleep(TICK.min(interval - slept));
        }
    }

    fn invoke_shutdown(&self, cycle: u32) -> MonitorOutcome {
        warn!(cycle, "no response within duration; shutting down");
        match self.shutdown.invoke() {
            Ok(()) => {
                self.audit.record(AuditEvent::ShutdownInvoked { cycle });
                MonitorOutcome::ShutdownInvoked
            }
            Err(err) => {
                warn!(code = err.code(), "{err}; not retrying");
                self.audit.record(AuditEvent::ShutdownFailed {
                    cycle,
                    error: err.to_string(),
                });
                MonitorOutcome::ShutdownFailed
            }
        }
    }
}
