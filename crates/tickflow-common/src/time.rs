//! Engine time.
//!
//! All of tickflow runs on a single absolute timeline: a signed nanosecond
//! count since the Unix epoch. Two sentinels bracket the range:
//!
//! - [`MIN_DT`] — "never set". A time series that has never ticked, or a
//!   schedule slot that holds no wake-up, carries this value.
//! - [`MAX_DT`] — "never scheduled". The clock's next-scheduled slot resets
//!   to this after each advance.
//!
//! Arithmetic saturates at the sentinels so that `MIN_DT + dt == MIN_DT` and
//! `MAX_DT` stays terminal; this keeps sentinel propagation silent instead of
//! wrapping into a plausible-looking timestamp.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

use chrono::{DateTime, TimeZone, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An absolute engine timestamp: signed nanoseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineTime(i64);

/// A signed duration in nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineTimeDelta(i64);

/// "Never set" sentinel: smaller than every real timestamp.
pub const MIN_DT: EngineTime = EngineTime(i64::MIN);

/// "Never scheduled" sentinel: larger than every real timestamp.
pub const MAX_DT: EngineTime = EngineTime(i64::MAX);

impl Default for EngineTime {
    fn default() -> Self {
        MIN_DT
    }
}

impl EngineTime {
    pub const fn from_nanos(nanos: i64) -> Self {
        EngineTime(nanos)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn from_secs(secs: i64) -> Self {
        EngineTime(secs * 1_000_000_000)
    }

    pub const fn is_sentinel(self) -> bool {
        self.0 == i64::MIN || self.0 == i64::MAX
    }

    /// Wall-clock now, truncated to nanoseconds.
    pub fn wall_clock_now() -> Self {
        let now = Utc::now();
        EngineTime(now.timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn to_utc(self) -> Option<DateTime<Utc>> {
        if self.is_sentinel() {
            return None;
        }
        Utc.timestamp_opt(self.0.div_euclid(1_000_000_000), self.0.rem_euclid(1_000_000_000) as u32)
            .single()
    }
}

impl EngineTimeDelta {
    pub const ZERO: EngineTimeDelta = EngineTimeDelta(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        EngineTimeDelta(nanos)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn from_micros(micros: i64) -> Self {
        EngineTimeDelta(micros * 1_000)
    }

    pub const fn from_millis(millis: i64) -> Self {
        EngineTimeDelta(millis * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        EngineTimeDelta(secs * 1_000_000_000)
    }

    pub fn to_std(self) -> Option<std::time::Duration> {
        u64::try_from(self.0).ok().map(std::time::Duration::from_nanos)
    }
}

impl Add<EngineTimeDelta> for EngineTime {
    type Output = EngineTime;

    fn add(self, rhs: EngineTimeDelta) -> EngineTime {
        if self.is_sentinel() {
            return self;
        }
        EngineTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<EngineTimeDelta> for EngineTime {
    fn add_assign(&mut self, rhs: EngineTimeDelta) {
        *self = *self + rhs;
    }
}

impl Sub<EngineTimeDelta> for EngineTime {
    type Output = EngineTime;

    fn sub(self, rhs: EngineTimeDelta) -> EngineTime {
        if self.is_sentinel() {
            return self;
        }
        EngineTime(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<EngineTime> for EngineTime {
    type Output = EngineTimeDelta;

    fn sub(self, rhs: EngineTime) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Add for EngineTimeDelta {
    type Output = EngineTimeDelta;

    fn add(self, rhs: EngineTimeDelta) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl Sub for EngineTimeDelta {
    type Output = EngineTimeDelta;

    fn sub(self, rhs: EngineTimeDelta) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for EngineTimeDelta {
    type Output = EngineTimeDelta;

    fn neg(self) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_neg())
    }
}

impl fmt::Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            i64::MIN => f.write_str("<never-set>"),
            i64::MAX => f.write_str("<never-scheduled>"),
            _ => match self.to_utc() {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.9fZ")),
                None => write!(f, "EngineTime({})", self.0),
            },
        }
    }
}

impl fmt::Debug for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineTime({self})")
    }
}

impl fmt::Display for EngineTimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl fmt::Debug for EngineTimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineTimeDelta({}ns)", self.0)
    }
}
