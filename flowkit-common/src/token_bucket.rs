//! Token bucket rate limiters.
//!
//! The rate limiter is split in two: an immutable [`SplitTokenRate`] describing the refill rate and
//! burst size, and a mutable [`SplitTokenBucket`] holding the fill level. One rate can drive any
//! number of buckets.
//!
//! Time is divided into *epochs* (jiffies by default). Tokens are kept in 32-bit fixed point: the
//! rate's `token_scale` maps one external token to `token_scale` internal units, chosen so that a
//! full burst is exactly [`MAX_TOKENS`] internal units. This keeps fractional tokens and makes the
//! refill precise even for low rates.
//!
//! Two special rates exist:
//! - *unlimited* (`rate == 0`): the bucket always contains every token asked for.
//! - *idle* (`burst == 0`): the bucket never fills.

use crate::clock::{Jiffies, JiffyClock, HZ};

/// Unsigned type of token counts.
pub type Token = u32;

/// Type of time epochs.
pub type Epoch = Jiffies;

/// Internal token count of a full bucket.
pub const MAX_TOKENS: Token = Token::MAX;

/// Refill rate and burst size of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitTokenRate {
    /// Configured rate, in tokens per second.
    rate: u32,
    /// Configured burst, in tokens.
    burst: Token,
    /// Internal units added per epoch. 0 if idle.
    tokens_per_epoch: Token,
    /// Internal units per token. 0 if unlimited.
    token_scale: Token,
    /// Epochs it takes to refill a whole burst.
    epochs_per_burst: Epoch,
}

impl Default for SplitTokenRate {
    /// Returns an unlimited rate.
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl SplitTokenRate {
    /// Creates a rate of `rate` tokens per second with a burst of `burst` tokens, measured in
    /// jiffy epochs.
    pub fn new(rate: u32, burst: Token) -> Self {
        Self::with_frequency(rate, burst, HZ)
    }

    /// Creates a rate with `frequency` epochs per second.
    pub fn with_frequency(rate: u32, burst: Token, frequency: u32) -> Self {
        let mut this = Self {
            rate: 0,
            burst: 0,
            tokens_per_epoch: 0,
            token_scale: 0,
            epochs_per_burst: 1,
        };
        this.assign_with_frequency(rate, burst, frequency);
        this
    }

    /// Sets the rate to `rate` tokens per second and the burst size to `burst` tokens.
    ///
    /// A zero `rate` makes the bucket unlimited. A nonzero rate with a zero `burst` makes the
    /// bucket idle.
    pub fn assign(&mut self, rate: u32, burst: Token) {
        self.assign_with_frequency(rate, burst, HZ);
    }

    /// Like [`Self::assign`], with `frequency` epochs per second.
    pub fn assign_with_frequency(&mut self, rate: u32, burst: Token, frequency: u32) {
        debug_assert!(frequency > 0, "epoch frequency must be nonzero");

        self.rate = rate;
        self.burst = burst;

        if rate == 0 {
            self.token_scale = 0;
            self.tokens_per_epoch = 1;
            self.epochs_per_burst = 1;
            return;
        } else if burst == 0 {
            self.token_scale = 1;
            self.tokens_per_epoch = 0;
            self.epochs_per_burst = 0;
            return;
        }

        self.token_scale = MAX_TOKENS / burst;

        // Double-width multiply-divide: rate * scale can exceed 32 bits.
        let per_epoch = u64::from(rate) * u64::from(self.token_scale) / u64::from(frequency.max(1));
        // Rates faster than a whole burst per epoch saturate; rates slower than one internal unit
        // per epoch are rounded up so the bucket still fills.
        self.tokens_per_epoch = per_epoch.clamp(1, u64::from(MAX_TOKENS)) as Token;
        self.epochs_per_burst = Epoch::from(MAX_TOKENS / self.tokens_per_epoch);
    }

    /// Returns true iff the bucket is unlimited.
    #[inline]
    pub const fn is_unlimited(&self) -> bool {
        self.token_scale == 0
    }

    /// Returns true iff the bucket is idle.
    #[inline]
    pub const fn is_idle(&self) -> bool {
        self.tokens_per_epoch == 0
    }

    /// Returns the configured rate, in tokens per second.
    #[inline]
    pub const fn rate(&self) -> u32 {
        self.rate
    }

    /// Returns the configured burst, in tokens.
    #[inline]
    pub const fn burst(&self) -> Token {
        self.burst
    }

    /// Returns the internal units added per epoch.
    #[inline]
    pub const fn tokens_per_epoch(&self) -> Token {
        self.tokens_per_epoch
    }

    /// Returns the internal units per token.
    #[inline]
    pub const fn token_scale(&self) -> Token {
        self.token_scale
    }

    /// Returns the number of epochs a whole burst takes to refill.
    #[inline]
    pub const fn epochs_per_burst(&self) -> Epoch {
        self.epochs_per_burst
    }

    /// Converts `t` tokens to internal units, saturating at [`MAX_TOKENS`].
    #[inline]
    fn scaled(&self, t: Token) -> Token {
        (u64::from(t) * u64::from(self.token_scale)).min(u64::from(MAX_TOKENS)) as Token
    }
}

/// The fill level of a token bucket driven by a [`SplitTokenRate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitTokenBucket {
    /// Current fill level in internal units.
    tokens: Token,
    /// Epoch of the last fill.
    epoch: Epoch,
}

impl SplitTokenBucket {
    /// Creates an empty bucket at epoch 0.
    pub const fn new() -> Self {
        Self { tokens: 0, epoch: 0 }
    }

    /// Creates a full bucket last filled at `epoch`.
    pub fn full(rate: &SplitTokenRate, epoch: Epoch) -> Self {
        let mut this = Self { tokens: 0, epoch };
        this.set_full(rate);
        this
    }

    /// Empties the bucket.
    #[inline]
    pub fn clear(&mut self) {
        self.tokens = 0;
    }

    /// Returns the internal fill level.
    #[inline]
    pub const fn tokens(&self) -> Token {
        self.tokens
    }

    /// Returns the epoch of the last fill.
    #[inline]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns the number of whole tokens in the bucket. Unlimited buckets report
    /// [`Token::MAX`].
    #[inline]
    pub fn size(&self, rate: &SplitTokenRate) -> Token {
        if rate.is_unlimited() {
            return Token::MAX;
        }
        self.tokens / rate.token_scale
    }

    /// Returns true iff the bucket is full.
    #[inline]
    pub const fn is_full(&self) -> bool {
        self.tokens == MAX_TOKENS
    }

    /// Returns true iff the bucket holds at least `t` tokens.
    #[inline]
    pub fn contains(&self, rate: &SplitTokenRate, t: Token) -> bool {
        u64::from(t) * u64::from(rate.token_scale) <= u64::from(self.tokens)
    }

    /// Sets the bucket to hold `t` tokens, capped at the burst size. No-op for idle and unlimited
    /// rates.
    pub fn set(&mut self, rate: &SplitTokenRate, t: Token) {
        if rate.tokens_per_epoch != 0 && rate.token_scale != 0 {
            self.tokens = rate.scaled(t);
        }
    }

    /// Fills the bucket to a full burst. No-op for idle rates.
    pub fn set_full(&mut self, rate: &SplitTokenRate) {
        if rate.tokens_per_epoch != 0 {
            self.tokens = MAX_TOKENS;
        }
    }

    /// Refills the bucket for time `epoch`.
    ///
    /// An epoch earlier than the last fill is treated as no time having passed. Either way the
    /// bucket's epoch becomes `epoch`.
    pub fn fill(&mut self, rate: &SplitTokenRate, epoch: Epoch) {
        let diff = epoch.saturating_sub(self.epoch);
        if diff > rate.epochs_per_burst && rate.tokens_per_epoch != 0 {
            self.tokens = MAX_TOKENS;
        } else if diff > 0 {
            // diff <= epochs_per_burst, so this product fits in a token count.
            let delta = diff * u64::from(rate.tokens_per_epoch);
            self.tokens = (u64::from(self.tokens) + delta).min(u64::from(MAX_TOKENS)) as Token;
        }
        self.epoch = epoch;
    }

    /// Refills the bucket for the current time of `clock`.
    #[inline]
    pub fn fill_now(&mut self, rate: &SplitTokenRate, clock: &JiffyClock) {
        self.fill(rate, clock.now());
    }

    /// Removes `t` tokens. If fewer are present the bucket becomes empty.
    ///
    /// `t` must not exceed the burst size.
    #[inline]
    pub fn remove(&mut self, rate: &SplitTokenRate, t: Token) {
        debug_assert!(rate.is_unlimited() || t <= rate.burst, "removing more than a burst");
        self.tokens = self.tokens.saturating_sub(rate.scaled(t));
    }

    /// Removes `t` tokens if the bucket holds at least that many. Returns whether tokens were
    /// removed.
    #[inline]
    pub fn remove_if(&mut self, rate: &SplitTokenRate, t: Token) -> bool {
        let t = u64::from(t) * u64::from(rate.token_scale);
        if u64::from(self.tokens) < t {
            false
        } else {
            self.tokens -= t as Token;
            true
        }
    }

    /// Returns the number of epochs until [`Self::contains`] holds for `t` tokens.
    ///
    /// The rate must not be idle.
    pub fn epochs_until_contains(&self, rate: &SplitTokenRate, t: Token) -> Epoch {
        debug_assert!(!rate.is_idle(), "idle buckets never fill");

        let need = u64::from(t) * u64::from(rate.token_scale);
        let have = u64::from(self.tokens);
        if have >= need {
            return 0;
        }
        (need - have).div_ceil(u64::from(rate.tokens_per_epoch.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn fill_never_exceeds_burst_nor_underflows() {
        let mut rng = rand::thread_rng();

        for _ in 0..64 {
            let rate = SplitTokenRate::new(rng.gen_range(1..100_000), rng.gen_range(1..10_000));
            let mut bucket = SplitTokenBucket::new();
            let mut epoch = 0;

            for _ in 0..1_000 {
                epoch += rng.gen_range(0..50);
                bucket.fill(&rate, epoch);
                assert!(bucket.tokens() <= MAX_TOKENS);
                assert!(bucket.size(&rate) <= rate.burst());

                let t = rng.gen_range(0..=rate.burst());
                bucket.remove(&rate, t);
                assert!(bucket.size(&rate) <= rate.burst());
            }
        }
    }

    #[test]
    fn idle_bucket_never_contains_tokens() {
        let rate = SplitTokenRate::new(1_000, 0);
        assert!(rate.is_idle());

        let mut bucket = SplitTokenBucket::full(&rate, 0);
        for epoch in [0, 1, 10, 1_000_000, u64::MAX / 2] {
            bucket.fill(&rate, epoch);
            assert!(!bucket.contains(&rate, 1));
            assert!(!bucket.remove_if(&rate, 1));
        }
    }

    #[test]
    fn unlimited_bucket_always_contains_tokens() {
        let rate = SplitTokenRate::new(0, 0);
        assert!(rate.is_unlimited());

        let mut bucket = SplitTokenBucket::full(&rate, 0);
        for t in [0, 1, 1_000, Token::MAX] {
            assert!(bucket.contains(&rate, t));
            bucket.remove(&rate, t);
            assert!(bucket.is_full());
            assert!(bucket.remove_if(&rate, t));
        }
        assert_eq!(bucket.size(&rate), Token::MAX);
    }

    #[test]
    fn backward_epoch_adds_nothing() {
        let rate = SplitTokenRate::new(100, 10);
        let mut bucket = SplitTokenBucket::new();

        bucket.fill(&rate, 500);
        bucket.clear();
        bucket.fill(&rate, 400);
        assert_eq!(bucket.tokens(), 0);
        assert_eq!(bucket.epoch(), 400);
    }

    #[test]
    fn long_idle_period_fills_completely() {
        let rate = SplitTokenRate::new(10, 5);
        let mut bucket = SplitTokenBucket::new();

        bucket.fill(&rate, rate.epochs_per_burst() + 1);
        assert!(bucket.is_full());
        assert_eq!(bucket.size(&rate), 5);
    }

    #[test]
    fn epochs_until_contains_is_exact() {
        let rate = SplitTokenRate::new(10, 1);
        let mut bucket = SplitTokenBucket::new();

        let wait = bucket.epochs_until_contains(&rate, 1);
        assert!(wait > 0);

        bucket.fill(&rate, wait - 1);
        assert!(!bucket.contains(&rate, 1));
        bucket.fill(&rate, wait);
        assert!(bucket.contains(&rate, 1));
        assert_eq!(bucket.epochs_until_contains(&rate, 1), 0);

        // 10 tokens per second at one token per burst is roughly one token every 100 jiffies.
        let expected = u64::from(HZ) / 10;
        assert!((expected..=expected + 1).contains(&wait), "wait = {wait}");
    }

    #[test]
    fn remove_if_is_all_or_nothing() {
        // One token per epoch.
        let rate = SplitTokenRate::with_frequency(4, 4, 4);
        let mut bucket = SplitTokenBucket::new();

        bucket.fill(&rate, 3);
        assert_eq!(bucket.size(&rate), 3);
        assert!(!bucket.remove_if(&rate, 4));
        assert_eq!(bucket.size(&rate), 3);
        assert!(bucket.remove_if(&rate, 2));
        assert_eq!(bucket.size(&rate), 1);

        bucket.remove(&rate, 4);
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn removals_converge_to_rate() {
        const RATE: u32 = 100;
        const BURST: Token = 10;
        const SECONDS: u64 = 20;

        let rate = SplitTokenRate::new(RATE, BURST);
        let mut bucket = SplitTokenBucket::new();
        let mut removed = 0u64;

        for epoch in 0..=SECONDS * u64::from(HZ) {
            bucket.fill(&rate, epoch);
            if bucket.remove_if(&rate, 1) {
                removed += 1;
            }
        }

        let expected = u64::from(RATE) * SECONDS;
        assert!(
            removed.abs_diff(expected) <= u64::from(BURST),
            "removed {removed}, expected about {expected}"
        );
    }
}
