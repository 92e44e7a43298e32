//! Wall-clock and monotonic time behind one seam.
//!
//! The monitoring cycle never calls `Instant::now()` or `thread::sleep`
//! directly; it goes through [`Clock`] so that every suspension point can be
//! driven by a [`SimulatedClock`] in tests.

use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

/// Source of time for the monitoring cycle.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now_local(&self) -> NaiveDateTime;
    /// Monotonic time since an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;
    /// Suspend the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real clock backed by `chrono::Local` and `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type ScheduledAction = Box<dyn FnOnce() + Send>;

struct SimulatedState {
    wall_origin: NaiveDateTime,
    elapsed: Duration,
    pending: Vec<(Duration, ScheduledAction)>,
}

/// Deterministic clock that only advances when slept.
///
/// Actions registered with [`SimulatedClock::at`] run on the sleeping thread
/// as soon as simulated time reaches their offset, in offset order. They run
/// outside the clock's lock, so an action may itself read the clock.
pub struct SimulatedClock {
    state: Mutex<SimulatedState>,
}

impl SimulatedClock {
    /// Start simulated time at `wall_origin` (local wall clock, elapsed zero).
    #[must_use]
    pub fn new(wall_origin: NaiveDateTime) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                wall_origin,
                elapsed: Duration::ZERO,
                pending: Vec::new(),
            }),
        }
    }

    /// Run `action` once simulated time reaches `offset` from the origin.
    pub fn at(&self, offset: Duration, action: impl FnOnce() + Send + 'static) {
        self.state.lock().pending.push((offset, Box::new(action)));
    }

    /// Total simulated time slept so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }
}

impl Clock for SimulatedClock {
    fn now_local(&self) -> NaiveDateTime {
        let state = self.state.lock();
        chrono::Duration::from_std(state.elapsed)
            .ok()
            .and_then(|offset| state.wall_origin.checked_add_signed(offset))
            .unwrap_or(state.wall_origin)
    }

    fn monotonic(&self) -> Duration {
        self.state.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut due = {
            let mut state = self.state.lock();
            state.elapsed += duration;
            let now = state.elapsed;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|(offset, _)| *offset <= now);
            state.pending = pending;
            due
        };
        due.sort_by_key(|(offset, _)| *offset);
        for (_, action) in due {
            action();
        }
    }
}
