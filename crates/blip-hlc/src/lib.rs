//! Hybrid Logical Clock for causally ordered revision timestamps.
//!
//! A [`LogicalTime`] combines wall-clock nanoseconds with a 16-bit counter so
//! that timestamps generated on one peer are both monotonically increasing
//! and comparable to timestamps received from other peers. The algorithm
//! follows Kulkarni et al., "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014).

mod clock;
mod time;

pub use clock::{ClockSource, FakeClockSource, HybridClock, RealClockSource};
pub use time::{LogicalTime, WallTime};

/// Errors produced by [`HybridClock`] and the time types.
#[derive(Debug, thiserror::Error)]
pub enum HlcError {
    /// A received timestamp was rejected by `checkTime`: either below the
    /// configured floor or above the sanity ceiling.
    #[error("timestamp {0:#x} is out of the valid range")]
    InvalidTimestamp(u64),

    /// A received timestamp exceeded the configured clock-skew tolerance.
    #[error("timestamp {seen:#x} is too far ahead of local time {local:#x}")]
    ClockSkewExceeded {
        /// The rejected, received timestamp.
        seen: u64,
        /// The local wall-clock time it was compared against.
        local: u64,
    },
}
