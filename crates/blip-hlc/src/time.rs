//! `WallTime` and `LogicalTime` newtypes.

use std::time::{SystemTime, UNIX_EPOCH};

/// A local wall-clock reading expressed as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(u64);

impl WallTime {
    /// The Unix epoch itself.
    pub const EPOCH: WallTime = WallTime(0);

    /// Wraps a raw nanosecond count.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        WallTime(nanos)
    }

    /// The raw nanosecond count.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Reads the current system time. Panics only if the system clock is set
    /// before the Unix epoch, which indicates a misconfigured host.
    #[must_use]
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        WallTime(dur.as_nanos() as u64)
    }

    /// Seconds since the Unix epoch, for diagnostics.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl std::ops::Add<u64> for WallTime {
    type Output = WallTime;

    fn add(self, nanos: u64) -> WallTime {
        WallTime(self.0.saturating_add(nanos))
    }
}

/// A version's logical timestamp: a large integer that increases
/// monotonically for a given peer. In practice it is a Hybrid Logical
/// Timestamp and close to real time; see [`crate::HybridClock`].
///
/// Reserved values: `0` means "no timestamp" and `u64::MAX` means
/// "end of time" (an upper sentinel used by open-ended ranges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// The nanosecond mask covering the low-order counter bits.
    pub const COUNTER_MASK: u64 = 0xFFFF;

    /// Sentinel meaning "no timestamp".
    pub const NONE: LogicalTime = LogicalTime(0);

    /// Sentinel meaning "end of time", used as an open upper bound.
    pub const END_OF_TIME: LogicalTime = LogicalTime(u64::MAX);

    /// Wraps a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        LogicalTime(value)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Is this the `none` sentinel?
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The wall-time component: the upper 48 bits, masked to a whole
    /// nanosecond count with the counter bits zeroed.
    #[must_use]
    pub const fn wall(self) -> WallTime {
        WallTime::from_nanos(self.0 & !Self::COUNTER_MASK)
    }

    /// The 16-bit monotonic counter component.
    #[must_use]
    pub const fn counter(self) -> u16 {
        (self.0 & Self::COUNTER_MASK) as u16
    }

    /// Builds a `LogicalTime` from separate wall and counter components,
    /// masking the wall time down to its upper 48 bits first.
    #[must_use]
    pub const fn from_parts(wall: WallTime, counter: u16) -> Self {
        LogicalTime((wall.as_nanos() & !Self::COUNTER_MASK) | counter as u64)
    }

    /// Seconds since the Unix epoch, for diagnostics; not necessarily exact
    /// real time even for a hybrid time created locally, but never behind.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
