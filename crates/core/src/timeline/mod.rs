//! The broadcast clock.
//!
//! Every listener derives the same cycle position from the local time of day,
//! so no coordination between viewers is needed. Between resyncs the clock
//! advances on the monotonic clock; a periodic guard compares the two and
//! resyncs when they disagree.

use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

use chrono::Timelike;

use crate::{config::RadioConfig, events::PositionUpdate, RadioError, Result};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Reduces `position` into `[0, total)`.
pub fn wrap_position(position: f64, total: f64) -> f64 {
    let wrapped = position.rem_euclid(total);
    // rem_euclid can round up to `total` for tiny negative inputs.
    if wrapped >= total {
        0.0
    } else {
        wrapped
    }
}

/// Shortest distance between two positions on a loop of length `total`.
pub fn circular_distance(a: f64, b: f64, total: f64) -> f64 {
    let direct = wrap_position(a - b, total);
    direct.min(total - direct)
}

/// Source of "now" for everything time dependent.
pub trait TimeSource {
    /// Monotonic instant used to measure elapsed time.
    fn now(&self) -> Instant;
    /// Local wall-clock seconds since midnight, including the fraction.
    fn seconds_since_midnight(&self) -> f64;
}

/// The real clocks of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn seconds_since_midnight(&self) -> f64 {
        let now = chrono::Local::now();
        // Leap seconds report nanoseconds above one billion.
        let nanos = now.nanosecond().min(999_999_999);
        now.num_seconds_from_midnight() as f64 + nanos as f64 / 1e9
    }
}

/// Hand-driven time source. Clones share the same underlying clocks.
#[derive(Debug, Clone)]
pub struct ManualTime {
    inner: Rc<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    elapsed: Cell<Duration>,
    time_of_day: Cell<f64>,
}

impl ManualTime {
    pub fn new(time_of_day: f64) -> Self {
        Self {
            inner: Rc::new(ManualState {
                origin: Instant::now(),
                elapsed: Cell::new(Duration::ZERO),
                time_of_day: Cell::new(wrap_position(time_of_day, SECONDS_PER_DAY)),
            }),
        }
    }

    /// Advances both the monotonic and the wall clock.
    pub fn advance(&self, seconds: f64) {
        let state = &self.inner;
        state
            .elapsed
            .set(state.elapsed.get() + Duration::from_secs_f64(seconds));
        self.jump_wall_clock(seconds);
    }

    /// Moves only the wall clock, as a suspended machine or an NTP step would.
    pub fn jump_wall_clock(&self, seconds: f64) {
        let state = &self.inner;
        state.time_of_day.set(wrap_position(
            state.time_of_day.get() + seconds,
            SECONDS_PER_DAY,
        ));
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        self.inner.origin + self.inner.elapsed.get()
    }

    fn seconds_since_midnight(&self) -> f64 {
        self.inner.time_of_day.get()
    }
}

/// Locally owned periodic timer, polled from the driving loop.
///
/// Missed periods are coalesced: after a stall `poll` fires once and the next
/// deadline is scheduled a full period after the stall.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period: Duration,
    next_due: Option<Instant>,
}

impl IntervalTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    /// Arms the timer so that it first fires one period from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.period);
    }

    /// Arms the timer so that the next poll fires.
    pub fn arm_immediate(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let mut next = due + self.period;
                if next <= now {
                    next = now + self.period;
                }
                self.next_due = Some(next);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
}

/// Outcome of one drift guard pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCheck {
    pub expected: f64,
    pub actual: f64,
    pub drift: f64,
    pub resynced: bool,
}

/// Derives the shared cycle position from the time of day.
#[derive(Debug)]
pub struct RadioClock<T: TimeSource> {
    time: T,
    total_duration: f64,
    state: ClockState,
    start_position: f64,
    reference: Instant,
    last_position: f64,
    drift_tolerance: f64,
    /// Set by a debug seek; the drift guard leaves the position alone until
    /// the next explicit resync.
    pinned: bool,
    broadcast: IntervalTimer,
    drift_guard: IntervalTimer,
}

impl<T: TimeSource> RadioClock<T> {
    pub fn new(time: T, total_duration: f64, config: &RadioConfig) -> Result<Self> {
        config.validate()?;
        if !total_duration.is_finite() || total_duration <= 0.0 {
            return Err(RadioError::config(format!(
                "cycle duration must be positive, got {total_duration}"
            )));
        }
        let reference = time.now();
        Ok(Self {
            time,
            total_duration,
            state: ClockState::Stopped,
            start_position: 0.0,
            reference,
            last_position: 0.0,
            drift_tolerance: config.clock_drift_tolerance_secs,
            pinned: false,
            broadcast: IntervalTimer::new(config.broadcast_interval()),
            drift_guard: IntervalTimer::new(config.clock_drift_check()),
        })
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn time(&self) -> &T {
        &self.time
    }

    /// Position implied by the wall clock alone.
    pub fn wall_clock_position(&self) -> f64 {
        wrap_position(
            self.time.seconds_since_midnight(),
            self.total_duration,
        )
    }

    /// Derives the start position and begins broadcasting.
    pub fn start(&mut self) {
        self.state = ClockState::Running;
        self.resync();
        let now = self.time.now();
        self.broadcast.arm_immediate(now);
        self.drift_guard.arm(now);
        tracing::info!(
            position = self.start_position,
            total = self.total_duration,
            "clock started"
        );
    }

    /// Cancels the broadcast; the last position stays frozen.
    pub fn stop(&mut self) {
        if self.state == ClockState::Stopped {
            return;
        }
        self.last_position = self.current_position();
        self.state = ClockState::Stopped;
        self.broadcast.cancel();
        self.drift_guard.cancel();
        tracing::info!(position = self.last_position, "clock stopped");
    }

    /// Re-derives the start position from the time of day. A stopped clock
    /// keeps reporting the position it froze at.
    pub fn resync(&mut self) {
        self.start_position = self.wall_clock_position();
        self.reference = self.time.now();
        if self.state == ClockState::Running {
            self.last_position = self.start_position;
        }
        self.pinned = false;
    }

    /// Forces an arbitrary position. Debug tooling only.
    #[cfg(any(test, feature = "debug-tools"))]
    pub fn seek(&mut self, position: f64) {
        self.start_position = wrap_position(position, self.total_duration);
        self.reference = self.time.now();
        self.last_position = self.start_position;
        self.pinned = true;
        tracing::info!(position = self.start_position, "clock seeked");
    }

    pub fn current_position(&self) -> f64 {
        match self.state {
            ClockState::Stopped => self.last_position,
            ClockState::Running => {
                let elapsed = self.time.now().saturating_duration_since(self.reference);
                wrap_position(
                    self.start_position + elapsed.as_secs_f64(),
                    self.total_duration,
                )
            }
        }
    }

    /// Emits a position update when the broadcast timer is due.
    pub fn tick(&mut self) -> Option<PositionUpdate> {
        if self.state != ClockState::Running || !self.broadcast.poll(self.time.now()) {
            return None;
        }
        Some(self.snapshot())
    }

    /// Builds a position update for the current instant without touching the
    /// broadcast timer.
    pub fn snapshot(&mut self) -> PositionUpdate {
        let position = self.current_position();
        self.last_position = position;
        PositionUpdate {
            position,
            progress: position / self.total_duration,
            total_duration: self.total_duration,
            emitted_at: self.time.seconds_since_midnight(),
        }
    }

    /// Runs the drift guard when its timer is due.
    pub fn check_drift(&mut self) -> Option<DriftCheck> {
        if self.state != ClockState::Running || !self.drift_guard.poll(self.time.now()) {
            return None;
        }
        Some(self.measure_drift())
    }

    /// Compares the locally advanced position with the wall-clock position
    /// and resyncs when they are further apart than the tolerance.
    pub fn measure_drift(&mut self) -> DriftCheck {
        let actual = self.current_position();
        let expected = self.wall_clock_position();
        let drift = circular_distance(actual, expected, self.total_duration);
        let resynced = !self.pinned && drift > self.drift_tolerance;
        if resynced {
            tracing::debug!(expected, actual, drift, "clock drift exceeded, resyncing");
            self.resync();
        }
        DriftCheck {
            expected,
            actual,
            drift,
            resynced,
        }
    }
}
