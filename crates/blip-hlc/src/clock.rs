//! [`HybridClock`]: a lock-free, CAS-loop based hybrid logical clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::{LogicalTime, WallTime};

/// An arbitrary floor below which a timestamp is rejected as "too far in the
/// past" — 27 June 2023, noonish, matching the source this module is
/// grounded on. Timestamps are 64-bit hybrid values, not plain wall-clock
/// nanoseconds, so this is not simply "now minus some duration".
const MIN_VALID_WALL_NANOS: u64 = 0x176c_9a6f_d690_0000;

/// Sanity ceiling: anything at or above the sign bit is obviously bogus
/// (negative numbers reinterpreted as huge unsigned values, corrupted data).
/// This is sometime in the year 2262.
const MAX_VALID_TIME: LogicalTime = LogicalTime::from_raw(0x7fff_ffff_ffff_ffff);

/// The limit to how far ahead a received timestamp can be, in nanoseconds
/// (2 minutes). Beyond this, `see` and `seen_time` reject the timestamp.
pub const MAX_CLOCK_SKEW_NANOS: u64 = 2 * 60 * 1_000_000_000;

/// Supplies wall-clock readings to a [`HybridClock`].
///
/// Swappable so tests can run with deterministic, monotonically-incrementing
/// fake time instead of the real system clock.
pub trait ClockSource: Send + Sync {
    /// The current wall-clock reading.
    fn now(&self) -> WallTime;

    /// The minimum `WallTime` that could be considered valid; used to seed
    /// `HybridClock`'s rejection floor.
    fn min_valid(&self) -> WallTime;
}

/// `ClockSource` backed by the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClockSource;

impl ClockSource for RealClockSource {
    fn now(&self) -> WallTime {
        WallTime::now()
    }

    fn min_valid(&self) -> WallTime {
        WallTime::from_nanos(MIN_VALID_WALL_NANOS)
    }
}

/// Deterministic `ClockSource` for tests: increments by a fixed `step` each
/// time `now()` is called, rather than reading the system clock.
#[derive(Debug)]
pub struct FakeClockSource {
    last: AtomicU64,
    start: u64,
    step: u64,
}

impl FakeClockSource {
    /// Creates a fake source starting at `t` nanoseconds, advancing by `step`
    /// on every `now()` call. `step` defaults to `0x10000` so that each call
    /// also advances past a whole counter range.
    #[must_use]
    pub fn new(t: u64, step: u64) -> Self {
        FakeClockSource { last: AtomicU64::new(t >> 16), start: t, step }
    }

    /// Directly sets the internal counter (in units of `step`), for test
    /// setup that needs to pin an exact starting point.
    pub fn set_time(&self, t: u64) {
        self.last.store(t >> 16, Ordering::SeqCst);
    }
}

impl Default for FakeClockSource {
    fn default() -> Self {
        FakeClockSource::new(0, 0x1_0000)
    }
}

impl ClockSource for FakeClockSource {
    fn now(&self) -> WallTime {
        let next = self.last.fetch_add(self.step, Ordering::SeqCst) + self.step;
        WallTime::from_nanos(next)
    }

    fn min_valid(&self) -> WallTime {
        WallTime::from_nanos(self.start + self.step)
    }
}

/// `(wall, counter)` decomposition of a `LogicalTime`, used only internally
/// by the update loop. A zero value (`wall=0, counter=0`) doubles as the
/// "reject, do not advance" sentinel returned by the CAS closures below,
/// matching the source's use of a default-constructed value for this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Components {
    wall: WallTime,
    counter: u16,
}

impl Components {
    const ZERO: Components = Components { wall: WallTime::from_nanos(0), counter: 0 };

    fn new(wall: WallTime, counter: u16) -> Self {
        Components { wall: WallTime::from_nanos(wall.as_nanos() & !LogicalTime::COUNTER_MASK), counter }
    }

    fn to_logical(self) -> LogicalTime {
        LogicalTime::from_parts(self.wall, self.counter)
    }
}

impl From<LogicalTime> for Components {
    fn from(t: LogicalTime) -> Self {
        Components { wall: t.wall(), counter: t.counter() }
    }
}

/// A process-wide logical clock combining wall time with a monotonic
/// counter, producing [`LogicalTime`] values that strictly increase across
/// calls and that can absorb timestamps received from other peers.
///
/// Thread-safe: all state transitions go through a single `compare_exchange`
/// loop on one atomic word.
pub struct HybridClock {
    source: Box<dyn ClockSource>,
    min_valid: LogicalTime,
    last_time: AtomicU64,
}

impl std::fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClock").field("state", &self.state()).finish_non_exhaustive()
    }
}

impl HybridClock {
    /// Creates a new clock backed by the real system clock, with persisted
    /// `state` (typically the value previously returned by `state()`) as its
    /// starting point.
    #[must_use]
    pub fn new(state: u64) -> Self {
        let source = RealClockSource;
        let min_valid = LogicalTime::from_raw(source.min_valid().as_nanos());
        HybridClock { source: Box::new(source), min_valid, last_time: AtomicU64::new(state) }
    }

    /// Creates a clock with an explicit `ClockSource`, for deterministic
    /// tests.
    #[must_use]
    pub fn with_source(source: Box<dyn ClockSource>) -> Self {
        let min_valid = LogicalTime::from_raw(source.min_valid().as_nanos());
        HybridClock { source, min_valid, last_time: AtomicU64::new(0) }
    }

    /// Replaces the clock source, resetting state. For tests only.
    pub fn set_source(&mut self, source: Box<dyn ClockSource>) {
        self.min_valid = LogicalTime::from_raw(source.min_valid().as_nanos());
        self.source = source;
        self.last_time.store(LogicalTime::NONE.as_raw(), Ordering::SeqCst);
    }

    /// The current state, suitable for persisting and passed back to `new`.
    #[must_use]
    pub fn state(&self) -> u64 {
        self.last_time.load(Ordering::SeqCst)
    }

    fn update(&self, mut f: impl FnMut(Components) -> Components) -> LogicalTime {
        let mut then = self.last_time.load(Ordering::SeqCst);
        loop {
            let now = f(Components::from(LogicalTime::from_raw(then))).to_logical();
            if now == LogicalTime::NONE {
                return LogicalTime::NONE;
            }
            match self.last_time.compare_exchange_weak(
                then,
                now.as_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return now,
                Err(actual) => then = actual,
            }
        }
    }

    /// Returns a timestamp for the current moment. Guaranteed to be larger
    /// than any previous value returned by `now`, or seen by `see` /
    /// `seen_time`.
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        self.update(|then| {
            let mut now = Components::new(self.source.now(), 0);
            if now.wall <= then.wall {
                now = then;
                now.counter += 1;
            }
            now
        })
    }

    /// Updates internal state based on a timestamp received from elsewhere,
    /// so that a subsequent `now()` will be greater than `t`.
    ///
    /// Returns `false` if `t` is outside the valid range or too far ahead of
    /// local wall time. It is important to call this whenever a timestamp is
    /// received so local clocks don't drift apart and new timestamps stay
    /// ahead of everything already seen.
    #[must_use]
    pub fn see(&self, t: LogicalTime) -> bool {
        if !self.check_time(t) {
            return false;
        }
        if t <= LogicalTime::from_raw(self.last_time.load(Ordering::SeqCst)) {
            return true;
        }
        self.seen_time_impl(t, false) != LogicalTime::NONE
    }

    /// Registers a timestamp received from elsewhere and returns a current
    /// timestamp corresponding to having received it; always advances past
    /// `t` even if local state already exceeds it.
    ///
    /// Returns [`LogicalTime::NONE`] if `t` is outside the valid range or too
    /// far ahead of local wall time.
    #[must_use]
    pub fn seen_time(&self, t: LogicalTime) -> LogicalTime {
        if !self.check_time(t) {
            return LogicalTime::NONE;
        }
        self.seen_time_impl(t, true)
    }

    fn seen_time_impl(&self, seen_t: LogicalTime, skip_past: bool) -> LogicalTime {
        let seen = Components::from(seen_t);
        let skip = u16::from(skip_past);
        self.update(|then| {
            let local_wall = self.source.now();
            if seen.wall.as_nanos() > local_wall.as_nanos().saturating_add(MAX_CLOCK_SKEW_NANOS) {
                tracing::warn!(
                    seen = %seen_t,
                    local_wall = local_wall.as_nanos(),
                    "HybridClock: received time is too far in the future"
                );
                return Components::ZERO;
            }

            let wall = seen.wall.max(then.wall).max(local_wall);
            let mut now = Components::new(wall, 0);
            if now.wall == then.wall {
                now.counter = if now.wall == seen.wall {
                    then.counter.max(seen.counter) + skip
                } else {
                    then.counter + skip
                };
            } else if now.wall == seen.wall {
                now.counter = seen.counter + skip;
            }
            now
        })
    }

    fn check_time(&self, t: LogicalTime) -> bool {
        if t < self.min_valid {
            tracing::warn!(t = %t, "HybridClock: received time is too far in the past");
            false
        } else if t > MAX_VALID_TIME {
            tracing::warn!(t = %t, "HybridClock: received time is invalid; distant future");
            false
        } else {
            true
        }
    }

    /// Returns true if `t` is in the valid range (at least the configured
    /// floor, at most the sanity ceiling).
    #[must_use]
    pub fn valid_time(&self, t: LogicalTime) -> bool {
        t >= self.min_valid && t <= MAX_VALID_TIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_clock() -> HybridClock {
        HybridClock::with_source(Box::new(FakeClockSource::new(0x1_0000_0000_0000, 0x1_0000)))
    }

    #[test]
    fn now_strictly_increases() {
        let clock = fake_clock();
        let mut prev = LogicalTime::NONE;
        for _ in 0..100 {
            let t = clock.now();
            assert!(t > prev);
            prev = t;
        }
    }

    #[test]
    fn now_bumps_counter_when_wall_does_not_advance() {
        let source = FakeClockSource::new(0x1_0000_0000_0000, 0);
        let clock = HybridClock::with_source(Box::new(source));
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a.wall(), b.wall());
        assert_eq!(b.counter(), a.counter() + 1);
    }

    #[test]
    fn see_advances_now_past_seen_time() {
        let clock = fake_clock();
        let far_future = LogicalTime::from_parts(WallTime::from_nanos(0x7000_0000_0000), 0);
        assert!(clock.see(far_future));
        assert!(clock.now() > far_future);
    }

    #[test]
    fn see_rejects_excessive_skew() {
        let clock = fake_clock();
        let way_out_there = LogicalTime::from_parts(WallTime::from_nanos(0x7fff_0000_0000), 0);
        assert!(!clock.see(way_out_there));
    }

    #[test]
    fn see_is_idempotent_when_already_seen() {
        let clock = fake_clock();
        let t = clock.now();
        assert!(clock.see(t));
        assert!(clock.see(t));
    }

    #[test]
    fn check_time_rejects_below_floor() {
        let clock = fake_clock();
        assert!(!clock.valid_time(LogicalTime::from_raw(1)));
    }

    #[test]
    fn seen_time_always_advances_even_if_locally_ahead() {
        let clock = fake_clock();
        let now1 = clock.now();
        let seen = clock.seen_time(LogicalTime::from_raw(clock.min_valid.as_raw() + 1));
        assert!(seen > now1);
    }
}
