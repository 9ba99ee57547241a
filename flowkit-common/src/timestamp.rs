use std::{
    fmt,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    time::{Duration, SystemTime},
};

use crate::clock::{Jiffies, HZ};

/// Number of subseconds in a second.
#[cfg(not(feature = "nanotimestamp"))]
pub const SUBSEC_PER_SEC: u32 = 1_000_000;
/// Number of subseconds in a second.
#[cfg(feature = "nanotimestamp")]
pub const SUBSEC_PER_SEC: u32 = 1_000_000_000;

const NSEC_PER_SUBSEC: u32 = 1_000_000_000 / SUBSEC_PER_SEC;
const SUBSEC_PER_MSEC: u32 = SUBSEC_PER_SEC / 1_000;
const SUBSEC_PER_USEC: u32 = SUBSEC_PER_SEC / 1_000_000;

/// A point in time (or an interval) with second plus subsecond precision.
///
/// The subsecond part is always in `[0, SUBSEC_PER_SEC)`. Negative values are represented by a
/// negative second count and a non-negative subsecond count: -0.1s is `sec = -1` and
/// `subsec = 0.9 * SUBSEC_PER_SEC`. Because of this normalization the derived ordering on
/// `(sec, subsec)` is the chronological one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    sec: i64,
    subsec: u32,
}

impl Timestamp {
    /// The zero timestamp (the UNIX epoch, or an empty interval).
    pub const ZERO: Self = Self { sec: 0, subsec: 0 };

    /// Creates a timestamp of `sec` seconds plus `subsec` subseconds.
    ///
    /// `subsec` values of `SUBSEC_PER_SEC` or more carry into the seconds.
    #[inline]
    pub fn new(sec: i64, subsec: u32) -> Self {
        Self::normalized(sec, i64::from(subsec))
    }

    /// Creates a timestamp from a possibly out-of-range (or negative) subsecond count.
    fn normalized(sec: i64, subsec: i64) -> Self {
        let per_sec = i64::from(SUBSEC_PER_SEC);
        let sec = sec + subsec.div_euclid(per_sec);
        let subsec = subsec.rem_euclid(per_sec) as u32;
        Self { sec, subsec }
    }

    /// Creates a timestamp from a number of milliseconds.
    #[inline]
    pub fn from_msec(msec: i64) -> Self {
        Self::normalized(
            msec.div_euclid(1_000),
            msec.rem_euclid(1_000) * i64::from(SUBSEC_PER_MSEC),
        )
    }

    /// Creates a timestamp from a number of microseconds.
    #[inline]
    pub fn from_usec(usec: i64) -> Self {
        Self::normalized(
            usec.div_euclid(1_000_000),
            usec.rem_euclid(1_000_000) * i64::from(SUBSEC_PER_USEC),
        )
    }

    /// Creates a timestamp from a number of nanoseconds. Precision below one subsecond is
    /// truncated.
    #[inline]
    pub fn from_nsec(nsec: i64) -> Self {
        Self::normalized(
            nsec.div_euclid(1_000_000_000),
            nsec.rem_euclid(1_000_000_000) / i64::from(NSEC_PER_SUBSEC),
        )
    }

    /// Creates a timestamp covering `jiffies` clock ticks.
    #[inline]
    pub fn from_jiffies(jiffies: Jiffies) -> Self {
        let hz = u64::from(HZ);
        let sec = (jiffies / hz) as i64;
        let subsec = (jiffies % hz) * u64::from(SUBSEC_PER_SEC) / hz;
        Self::normalized(sec, subsec as i64)
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => Self::from(since),
            Err(before) => -Self::from(before.duration()),
        }
    }

    /// Converts microseconds to subseconds.
    #[inline]
    pub const fn usec_to_subsec(usec: u32) -> u32 {
        usec * SUBSEC_PER_USEC
    }

    /// Returns the (possibly negative) whole seconds.
    #[inline]
    pub const fn sec(&self) -> i64 {
        self.sec
    }

    /// Returns the subseconds, always in `[0, SUBSEC_PER_SEC)`.
    #[inline]
    pub const fn subsec(&self) -> u32 {
        self.subsec
    }

    /// Returns the subsecond part in microseconds.
    #[inline]
    pub const fn usec(&self) -> u32 {
        self.subsec / SUBSEC_PER_USEC
    }

    /// Returns the subsecond part in milliseconds.
    #[inline]
    pub const fn msec(&self) -> u32 {
        self.subsec / SUBSEC_PER_MSEC
    }

    /// Returns the whole timestamp in milliseconds, rounded toward negative infinity.
    #[inline]
    pub const fn msec1(&self) -> i64 {
        self.sec * 1_000 + (self.subsec / SUBSEC_PER_MSEC) as i64
    }

    /// Returns the whole timestamp in microseconds, rounded toward negative infinity.
    #[inline]
    pub const fn usec1(&self) -> i64 {
        self.sec * 1_000_000 + (self.subsec / SUBSEC_PER_USEC) as i64
    }

    /// Returns true if this is the zero timestamp.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.sec == 0 && self.subsec == 0
    }

    /// Returns true if this timestamp is before the zero timestamp.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.sec < 0
    }

    /// Converts to a [`Duration`]. Returns `None` for negative timestamps.
    pub fn to_duration(self) -> Option<Duration> {
        if self.is_negative() {
            return None;
        }

        Some(Duration::new(self.sec as u64, self.subsec * NSEC_PER_SUBSEC))
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self { sec: d.as_secs() as i64, subsec: d.subsec_nanos() / NSEC_PER_SUBSEC }
    }
}

impl Add for Timestamp {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::normalized(self.sec + rhs.sec, i64::from(self.subsec) + i64::from(rhs.subsec))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        self + Self::from(rhs)
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::normalized(self.sec - rhs.sec, i64::from(self.subsec) - i64::from(rhs.subsec))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        self - Self::from(rhs)
    }
}

impl SubAssign for Timestamp {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Timestamp {
    type Output = Self;

    fn neg(self) -> Self {
        Self::ZERO - self
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(not(feature = "nanotimestamp"))]
        const WIDTH: usize = 6;
        #[cfg(feature = "nanotimestamp")]
        const WIDTH: usize = 9;

        if self.sec < 0 && self.subsec != 0 {
            let (sec, subsec) = (-(self.sec + 1), SUBSEC_PER_SEC - self.subsec);
            write!(f, "-{sec}.{subsec:0width$}", width = WIDTH)
        } else {
            write!(f, "{}.{:0width$}", self.sec, self.subsec, width = WIDTH)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_keep_positive_subsec() {
        let t = Timestamp::from_msec(-100);
        assert_eq!(t.sec(), -1);
        assert_eq!(t.subsec(), SUBSEC_PER_SEC / 10 * 9);
        assert!(t.to_string().starts_with("-0.100"));
        assert!(t.is_negative());
        assert!(t < Timestamp::ZERO);
        assert_eq!(t.to_duration(), None);
    }

    #[test]
    fn add_and_sub_carry() {
        let a = Timestamp::new(1, SUBSEC_PER_SEC - 1);
        let b = Timestamp::new(0, 2);
        assert_eq!(a + b, Timestamp::new(2, 1));
        assert_eq!((a + b) - b, a);
        assert_eq!(b - a, -(a - b));
        assert_eq!(Timestamp::new(0, SUBSEC_PER_SEC), Timestamp::new(1, 0));
    }

    #[test]
    fn unit_constructors_agree() {
        assert_eq!(Timestamp::from_msec(1_500), Timestamp::from_usec(1_500_000));
        assert_eq!(Timestamp::from_usec(2_000_001), Timestamp::from_nsec(2_000_001_000));
        assert_eq!(Timestamp::from_jiffies(u64::from(HZ) * 3), Timestamp::new(3, 0));
        assert_eq!(Timestamp::from_msec(1_500).msec1(), 1_500);
        assert_eq!(Timestamp::from_msec(-1_500).msec1(), -1_500);
        assert_eq!(Timestamp::from_usec(1_234_567).usec(), 234_567);
    }

    #[test]
    fn duration_round_trip_and_display() {
        let d = Duration::from_millis(2_250);
        let t = Timestamp::from(d);
        assert_eq!(t.to_duration(), Some(d));
        assert_eq!(t + Duration::from_millis(750), Timestamp::new(3, 0));
        assert!(t.to_string().starts_with("2.25"));
        assert!(Timestamp::now() > Timestamp::ZERO);
    }
}
