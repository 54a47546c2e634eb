//! Fixed-cadence tick scheduling.
//!
//! The [`TickScheduler`] holds exactly one outstanding [`TickTimer`]. When the
//! timer elapses the scheduler:
//!
//! 1. moves to [`SchedulerState::Firing`],
//! 2. re-arms the next timer at `scheduled_at + interval`,
//! 3. invokes the step callback,
//! 4. returns to [`SchedulerState::Armed`].
//!
//! Because the next deadline is derived from the previous deadline rather than
//! from the time the step finished, a slow step does not push the cadence
//! back: the ticks that fell due meanwhile fire back-to-back on the next
//! poll. No tick is skipped and none fires twice.
//!
//! Time is read through the [`Clock`] trait so tests can drive the scheduler
//! with a [`ManualClock`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bouncesync_server::tick::{SchedulerState, TickScheduler};
//!
//! let mut scheduler = TickScheduler::new(Duration::from_millis(16), Duration::ZERO);
//! assert_eq!(scheduler.state(), SchedulerState::Armed);
//!
//! let mut steps = 0;
//! scheduler.poll(Duration::from_millis(50), |_| steps += 1);
//! assert_eq!(steps, 3); // due at 16, 32 and 48 ms
//! assert_eq!(scheduler.timer().scheduled_at, Duration::from_millis(64));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bouncesync_core::rows::TickTimer;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::context::ServerContext;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// A clock whose origin is the moment of construction.
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Simulated clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// A clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

// ---------------------------------------------------------------------------
// SchedulerState
// ---------------------------------------------------------------------------

/// Where the scheduler is in its two-state cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// A timer is outstanding.
    Armed,
    /// A timer elapsed and the next one is being armed.
    Firing,
}

// ---------------------------------------------------------------------------
// TimerFired
// ---------------------------------------------------------------------------

/// Passed to the step callback for each elapsed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// The timer that elapsed.
    pub fired: TickTimer,
    /// The timer armed in its place, already outstanding.
    pub rearmed: TickTimer,
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics accumulated by a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickDiagnostics {
    /// Steps invoked so far.
    pub ticks_fired: u64,
    /// Steps whose wall-clock duration exceeded the interval.
    pub late_steps: u64,
    /// Wall-clock duration of the most recent step.
    pub last_step_time: Duration,
    /// Largest number of timers found due by a single poll.
    pub max_backlog: u64,
}

// ---------------------------------------------------------------------------
// TickScheduler
// ---------------------------------------------------------------------------

/// Fixed-interval timer that invokes a step once per elapsed timer.
#[derive(Debug)]
pub struct TickScheduler {
    interval: Duration,
    timer: TickTimer,
    state: SchedulerState,
    diagnostics: TickDiagnostics,
}

impl TickScheduler {
    /// Arm the first timer at `start + interval`.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration, start: Duration) -> Self {
        assert!(!interval.is_zero(), "tick interval must be positive");
        Self {
            interval,
            timer: TickTimer {
                id: 1,
                scheduled_at: start + interval,
            },
            state: SchedulerState::Armed,
            diagnostics: TickDiagnostics::default(),
        }
    }

    /// Fire every timer that has elapsed at `now`, invoking `step` once for
    /// each, in deadline order. Returns the number of steps invoked.
    ///
    /// `now` is read once; timers that fall due while the steps run are left
    /// for the next poll. The next timer is armed before `step` runs and the
    /// scheduler stays [`Firing`](SchedulerState::Firing) until it returns,
    /// so a step that unwinds leaves the scheduler `Firing` with the
    /// following timer already outstanding.
    pub fn poll<F>(&mut self, now: Duration, mut step: F) -> u64
    where
        F: FnMut(&TimerFired),
    {
        let mut fired = 0u64;
        while self.timer.is_due(now) {
            self.state = SchedulerState::Firing;
            let elapsed = self.timer;
            self.timer = elapsed.next(self.interval);

            let started = Instant::now();
            step(&TimerFired {
                fired: elapsed,
                rearmed: self.timer,
            });
            let took = started.elapsed();
            self.state = SchedulerState::Armed;

            self.diagnostics.ticks_fired += 1;
            self.diagnostics.last_step_time = took;
            if took > self.interval {
                self.diagnostics.late_steps += 1;
            }
            fired += 1;
        }
        self.diagnostics.max_backlog = self.diagnostics.max_backlog.max(fired);
        fired
    }

    /// How long until the outstanding timer elapses (zero if overdue).
    pub fn time_until_due(&self, now: Duration) -> Duration {
        self.timer.scheduled_at.saturating_sub(now)
    }

    // -- accessors ----------------------------------------------------------

    /// The outstanding timer.
    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }

    /// `Armed` between polls; `Firing` only if a step unwound mid-poll.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The fixed interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Steps invoked so far.
    pub fn tick_count(&self) -> u64 {
        self.diagnostics.ticks_fired
    }

    /// Accumulated timing diagnostics.
    pub fn diagnostics(&self) -> &TickDiagnostics {
        &self.diagnostics
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Background thread that drives a [`ServerContext`] with a [`TickScheduler`].
///
/// Each step runs inside the context's exclusive section, so commands issued
/// from other threads interleave between ticks, never inside one.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<TickDiagnostics>>,
}

impl Ticker {
    /// Arm the first timer now and start ticking.
    pub fn spawn(ctx: Arc<ServerContext>, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("bouncesync-ticker".to_owned())
            .spawn(move || {
                let mut scheduler = ctx.arm_scheduler(clock.now());
                info!(interval = ?scheduler.interval(), "ticker started");
                while !thread_stop.load(Ordering::Acquire) {
                    let fired = scheduler.poll(clock.now(), |event| {
                        ctx.run_tick(event);
                    });
                    if fired > 1 {
                        debug!(fired, "ticker caught up on overdue timers");
                    }
                    let wait = scheduler.time_until_due(clock.now());
                    if !wait.is_zero() {
                        thread::park_timeout(wait);
                    }
                }
                info!(ticks = scheduler.tick_count(), "ticker stopped");
                scheduler.diagnostics().clone()
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and return its diagnostics.
    pub fn stop(mut self) -> TickDiagnostics {
        self.shutdown()
    }

    fn shutdown(&mut self) -> TickDiagnostics {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return TickDiagnostics::default();
        };
        handle.thread().unpark();
        handle.join().unwrap_or_else(|_| {
            error!("ticker thread panicked");
            TickDiagnostics::default()
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(16);

    #[test]
    fn starts_armed_one_interval_out() {
        let scheduler = TickScheduler::new(INTERVAL, Duration::from_millis(100));
        assert_eq!(scheduler.state(), SchedulerState::Armed);
        assert_eq!(scheduler.timer().id, 1);
        assert_eq!(scheduler.timer().scheduled_at, Duration::from_millis(116));
        assert_eq!(scheduler.tick_count(), 0);
    }

    #[test]
    #[should_panic(expected = "tick interval must be positive")]
    fn zero_interval_panics() {
        let _ = TickScheduler::new(Duration::ZERO, Duration::ZERO);
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let mut scheduler = TickScheduler::new(INTERVAL, Duration::ZERO);
        let fired = scheduler.poll(Duration::from_millis(15), |_| panic!("fired early"));
        assert_eq!(fired, 0);
        assert_eq!(scheduler.time_until_due(Duration::from_millis(15)), Duration::from_millis(1));
    }

    #[test]
    fn timer_is_rearmed_before_step_runs() {
        let mut scheduler = TickScheduler::new(INTERVAL, Duration::ZERO);
        let mut seen = Vec::new();
        scheduler.poll(INTERVAL, |event| seen.push(*event));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].fired.id, 1);
        assert_eq!(seen[0].rearmed.id, 2);
        assert_eq!(seen[0].rearmed.scheduled_at, INTERVAL * 2);
        assert_eq!(scheduler.timer(), &seen[0].rearmed);
        assert_eq!(scheduler.state(), SchedulerState::Armed);
    }

    #[test]
    fn unwinding_step_leaves_scheduler_firing_and_rearmed() {
        let mut scheduler = TickScheduler::new(INTERVAL, Duration::ZERO);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.poll(INTERVAL, |_| panic!("step failed"));
        }));
        assert!(result.is_err());
        assert_eq!(scheduler.state(), SchedulerState::Firing);
        assert_eq!(scheduler.timer().id, 2);
        assert_eq!(scheduler.timer().scheduled_at, INTERVAL * 2);

        // The next poll picks up from the re-armed timer.
        assert_eq!(scheduler.poll(INTERVAL * 2, |_| {}), 1);
        assert_eq!(scheduler.state(), SchedulerState::Armed);
        assert_eq!(scheduler.timer().id, 3);
    }

    #[test]
    fn overdue_timers_fire_back_to_back_in_order() {
        let mut scheduler = TickScheduler::new(INTERVAL, Duration::ZERO);
        let mut ids = Vec::new();
        let fired = scheduler.poll(INTERVAL * 5, |event| ids.push(event.fired.id));
        assert_eq!(fired, 5);
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(scheduler.diagnostics().max_backlog, 5);
    }

    #[test]
    fn fast_steps_fire_once_per_interval() {
        let clock = ManualClock::new();
        let mut scheduler = TickScheduler::new(INTERVAL, clock.now());
        let n = 250u64;
        let mut steps = 0u64;
        for _ in 0..n {
            clock.advance(INTERVAL);
            steps += scheduler.poll(clock.now(), |_| {});
        }
        assert_eq!(steps, n);
        assert_eq!(scheduler.tick_count(), n);
    }

    #[test]
    fn slow_steps_neither_skip_nor_duplicate() {
        let clock = ManualClock::new();
        let mut scheduler = TickScheduler::new(INTERVAL, clock.now());
        let n = 100u64;
        let horizon = INTERVAL * n as u32;

        // Every step burns two and a half intervals of simulated time.
        let mut steps = 0u64;
        clock.advance(INTERVAL);
        while scheduler.timer().scheduled_at <= horizon {
            let now = clock.now().min(horizon);
            steps += scheduler.poll(now, |_| clock.advance(INTERVAL * 5 / 2));
        }
        assert_eq!(steps, n);
        assert_eq!(scheduler.timer().id, n + 1);
    }

    #[test]
    fn uneven_polling_still_counts_exactly() {
        let clock = ManualClock::new();
        let mut scheduler = TickScheduler::new(INTERVAL, clock.now());
        let mut steps = 0u64;
        for jump_ms in [3u64, 40, 1, 0, 97, 16, 15, 1, 200] {
            clock.advance(Duration::from_millis(jump_ms));
            steps += scheduler.poll(clock.now(), |_| {});
        }
        // 373 ms elapsed: deadlines at 16, 32, ... 368.
        assert_eq!(steps, 23);
    }

    #[test]
    fn manual_clock_set_and_advance() {
        let clock = ManualClock::new();
        clock.set(Duration::from_secs(2));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(2005));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
