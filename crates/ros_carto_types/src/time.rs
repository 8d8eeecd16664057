//! Time on the universal time scale used by the SLAM back end.
//!
//! Instants are counted in ticks of 100 ns since 0001-01-01T00:00:00Z, which
//! keeps them positive and ordered for any ROS stamp.

use std::{
    fmt::Display,
    ops::{Add, Sub},
};

use crate::definitions::builtin_interfaces;

/// Seconds between 0001-01-01 and the Unix epoch.
pub const UTS_EPOCH_OFFSET_FROM_UNIX_EPOCH_IN_SECONDS: i64 = 719_162 * 24 * 60 * 60;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta(i64);

impl Time {
    /// Later than any representable measurement.
    pub const MAX: Self = Self(i64::MAX);

    pub fn from_universal(ticks: i64) -> Self {
        Self(ticks)
    }

    pub fn to_universal(self) -> i64 {
        self.0
    }

    /// Convert a ROS stamp, rounding the nanoseconds to the nearest tick.
    pub fn from_ros(stamp: &builtin_interfaces::Time) -> Self {
        Self(
            (i64::from(stamp.sec) + UTS_EPOCH_OFFSET_FROM_UNIX_EPOCH_IN_SECONDS) * TICKS_PER_SECOND
                + (i64::from(stamp.nanosec) + 50) / NANOS_PER_TICK,
        )
    }

    pub fn from_unix_nanos(nanos: i64) -> Self {
        Self(
            UTS_EPOCH_OFFSET_FROM_UNIX_EPOCH_IN_SECONDS * TICKS_PER_SECOND
                + nanos.div_euclid(NANOS_PER_TICK),
        )
    }

    pub fn to_unix_nanos(self) -> i64 {
        (self.0 - UTS_EPOCH_OFFSET_FROM_UNIX_EPOCH_IN_SECONDS * TICKS_PER_SECOND)
            .saturating_mul(NANOS_PER_TICK)
    }

    pub fn to_ros(self) -> builtin_interfaces::Time {
        let nanos = self.to_unix_nanos();
        builtin_interfaces::Time {
            sec: nanos.div_euclid(1_000_000_000) as i32,
            nanosec: nanos.rem_euclid(1_000_000_000) as u32,
        }
    }
}

impl TimeDelta {
    /// Truncates toward zero to whole ticks.
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * TICKS_PER_SECOND as f64) as i64)
    }

    pub fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub fn ticks(self) -> i64 {
        self.0
    }

    pub fn to_seconds(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }
}

impl Add<TimeDelta> for Time {
    type Output = Self;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub<TimeDelta> for Time {
    type Output = Self;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Time {
    type Output = TimeDelta;

    fn sub(self, rhs: Self) -> Self::Output {
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
