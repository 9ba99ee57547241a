use std::time::Duration;

use tokio::time::Instant;

/// Number of jiffies (clock ticks) per second.
pub const HZ: u32 = 1000;

/// A count of jiffies.
pub type Jiffies = u64;

const NSEC_PER_JIFFY: u64 = 1_000_000_000 / HZ as u64;

/// Converts a duration to whole jiffies, rounding down.
#[inline]
pub fn duration_to_jiffies(d: Duration) -> Jiffies {
    (d.as_nanos() / u128::from(NSEC_PER_JIFFY)) as Jiffies
}

/// Converts jiffies to a duration.
#[inline]
pub fn jiffies_to_duration(jiffies: Jiffies) -> Duration {
    Duration::from_secs(jiffies / u64::from(HZ))
        + Duration::from_nanos((jiffies % u64::from(HZ)) * NSEC_PER_JIFFY)
}

/// A monotonic jiffy counter, starting at zero when the clock is created.
///
/// Time is read from [`tokio::time::Instant`], so under a paused tokio test clock the jiffy count
/// advances only with the virtual time.
#[derive(Debug, Clone, Copy)]
pub struct JiffyClock {
    origin: Instant,
}

impl Default for JiffyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl JiffyClock {
    /// Creates a clock whose jiffy zero is now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Returns the instant corresponding to jiffy zero.
    #[inline]
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Returns the current jiffy count.
    #[inline]
    pub fn now(&self) -> Jiffies {
        self.at(Instant::now())
    }

    /// Returns the jiffy count at `instant`. Instants before the origin map to zero.
    #[inline]
    pub fn at(&self, instant: Instant) -> Jiffies {
        duration_to_jiffies(instant.saturating_duration_since(self.origin))
    }

    /// Returns the instant at which the jiffy count reaches `jiffies`.
    #[inline]
    pub fn instant(&self, jiffies: Jiffies) -> Instant {
        self.origin + jiffies_to_duration(jiffies)
    }
}
