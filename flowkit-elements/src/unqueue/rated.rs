use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use flowkit_common::{constants::KiB, JiffyClock, SplitTokenBucket, SplitTokenRate, Token};
use flowkit_packet::{Pull, Push};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn, Instrument};

use crate::{
    timer::{Step, Timer},
    ConfigError, ConfigErrors, HandleError,
};

/// Tokens a byte-rated unqueue must hold before it pulls, so that the largest packet never
/// finds the bucket short.
pub const BANDWIDTH_THRESHOLD: Token = 128 * KiB;

/// What one token buys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateUnit {
    /// One packet.
    #[default]
    Packets,
    /// One byte of packet data.
    Bytes,
}

/// Options for a [`RatedUnqueue`].
#[derive(Debug, Clone)]
pub struct RatedUnqueueOptions {
    /// Tokens per second. Zero means unlimited.
    rate: u32,
    /// Bucket capacity in tokens. Defaults to a hundredth of a second's worth, and at least one
    /// packet or [`BANDWIDTH_THRESHOLD`] bytes.
    burst: Option<Token>,
    unit: RateUnit,
    /// Whether the element starts pulling right away.
    active: bool,
}

impl RatedUnqueueOptions {
    /// Options for `rate` packets per second.
    pub fn new(rate: u32) -> Self {
        Self { rate, burst: None, unit: RateUnit::Packets, active: true }
    }

    /// Options for `rate` bytes per second.
    pub fn bandwidth(rate: u32) -> Self {
        Self { unit: RateUnit::Bytes, ..Self::new(rate) }
    }

    /// Sets the bucket capacity.
    pub fn burst(mut self, burst: Token) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Sets whether the element starts active.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Validates the options into a token rate.
    fn token_rate(&self) -> Result<SplitTokenRate, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        errors.check(self.burst != Some(0), || ConfigError::Zero("BURST"));
        let mut burst = self.burst.unwrap_or_else(|| (self.rate / 100).max(1));

        if self.unit == RateUnit::Bytes && burst < BANDWIDTH_THRESHOLD {
            if self.burst.is_some() {
                warn!(
                    burst,
                    threshold = BANDWIDTH_THRESHOLD,
                    "burst below bandwidth threshold, raising it"
                );
            }
            burst = BANDWIDTH_THRESHOLD;
        }

        errors.finish(SplitTokenRate::new(self.rate, burst))
    }
}

/// Counters shared between a rated unqueue's driver and its handles.
#[derive(Debug, Default)]
pub struct RatedUnqueueStats {
    /// Task activations.
    calls: AtomicU64,
    /// Pull attempts.
    pulls: AtomicU64,
    /// Pull attempts that found the input empty.
    failed_pulls: AtomicU64,
    /// Packets emitted.
    pushed: AtomicU64,
    /// Bytes emitted.
    bytes: AtomicU64,
}

impl RatedUnqueueStats {
    /// Task activations.
    #[inline]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Pull attempts.
    #[inline]
    pub fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::Relaxed)
    }

    /// Pull attempts that found the input empty.
    #[inline]
    pub fn failed_pulls(&self) -> u64 {
        self.failed_pulls.load(Ordering::Relaxed)
    }

    /// Packets emitted.
    #[inline]
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Bytes emitted.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
enum Command {
    SetRate(SplitTokenRate),
    SetActive(bool),
}

/// A handle to a running rated unqueue.
#[derive(Debug, Clone)]
pub struct RatedUnqueueHandle {
    to_driver: mpsc::UnboundedSender<Command>,
    unit: RateUnit,
    stats: Arc<RatedUnqueueStats>,
}

impl RatedUnqueueHandle {
    /// The shared counters.
    pub fn stats(&self) -> &RatedUnqueueStats {
        &self.stats
    }

    /// Changes the rate and burst. The bucket restarts full.
    pub fn set_rate(&self, rate: u32, burst: Option<Token>) -> Result<(), HandleError> {
        let mut options = RatedUnqueueOptions { unit: self.unit, ..RatedUnqueueOptions::new(rate) };
        options.burst = burst;
        let rate = options.token_rate()?;
        self.send(Command::SetRate(rate))
    }

    /// Starts or stops pulling.
    pub fn set_active(&self, active: bool) -> Result<(), HandleError> {
        self.send(Command::SetActive(active))
    }

    fn send(&self, cmd: Command) -> Result<(), HandleError> {
        self.to_driver.send(cmd).map_err(|_| HandleError::DriverStopped)
    }
}

/// Pulls packets from its input and pushes them to its output at a bounded rate.
///
/// In [`RateUnit::Packets`] mode every packet costs one token. In [`RateUnit::Bytes`] mode (the
/// bandwidth variant) a packet costs its length, and the element waits until the bucket holds
/// [`BANDWIDTH_THRESHOLD`] tokens before pulling.
#[derive(Debug)]
pub struct RatedUnqueue {
    rate: SplitTokenRate,
    unit: RateUnit,
    active: bool,
}

impl RatedUnqueue {
    /// Builds the element, validating the rate and burst.
    pub fn try_new(options: RatedUnqueueOptions) -> Result<Self, ConfigErrors> {
        let rate = options.token_rate()?;
        Ok(Self { rate, unit: options.unit, active: options.active })
    }

    /// The configured token rate.
    pub fn rate(&self) -> &SplitTokenRate {
        &self.rate
    }

    /// Binds the element to its ports, returning the driver future and a handle to it.
    pub fn into_driver<I, O>(
        self,
        input: I,
        output: O,
    ) -> (RatedUnqueueDriver<I, O>, RatedUnqueueHandle)
    where
        I: Pull + Unpin,
        O: Push + Unpin,
    {
        let (to_driver, from_handle) = mpsc::unbounded_channel();
        let stats = Arc::new(RatedUnqueueStats::default());
        let clock = JiffyClock::new();

        let threshold = match self.unit {
            RateUnit::Packets => 1,
            RateUnit::Bytes => BANDWIDTH_THRESHOLD,
        };

        let driver = RatedUnqueueDriver {
            input,
            output,
            bucket: SplitTokenBucket::full(&self.rate, clock.now()),
            rate: self.rate,
            unit: self.unit,
            threshold,
            active: self.active,
            clock,
            timer: Timer::default(),
            from_handle,
            stats: Arc::clone(&stats),
        };

        (driver, RatedUnqueueHandle { to_driver, unit: self.unit, stats })
    }

    /// Binds the element to its ports and spawns the driver on the tokio runtime.
    pub fn spawn<I, O>(self, input: I, output: O) -> RatedUnqueueHandle
    where
        I: Pull + Unpin + Send + 'static,
        O: Push + Unpin + Send + 'static,
    {
        let span =
            tracing::debug_span!("rated_unqueue", unit = ?self.unit, rate = self.rate.rate());
        let (driver, handle) = self.into_driver(input, output);
        tokio::spawn(driver.instrument(span));
        handle
    }
}

/// Drives a [`RatedUnqueue`]. Completes once its input closes.
#[derive(Debug)]
pub struct RatedUnqueueDriver<I, O> {
    input: I,
    output: O,
    rate: SplitTokenRate,
    bucket: SplitTokenBucket,
    unit: RateUnit,
    /// Tokens required before pulling.
    threshold: Token,
    active: bool,
    clock: JiffyClock,
    timer: Timer,
    from_handle: mpsc::UnboundedReceiver<Command>,
    stats: Arc<RatedUnqueueStats>,
}

impl<I: Pull, O: Push> RatedUnqueueDriver<I, O> {
    fn poll_commands(&mut self, cx: &mut Context<'_>) {
        while let Poll::Ready(Some(cmd)) = self.from_handle.poll_recv(cx) {
            match cmd {
                Command::SetRate(rate) => {
                    debug!(rate = rate.rate(), burst = rate.burst(), "rate changed");
                    self.bucket = SplitTokenBucket::full(&rate, self.clock.now());
                    self.rate = rate;
                    self.timer.unschedule();
                }
                Command::SetActive(active) => {
                    debug!(active, "activity changed");
                    self.active = active;
                    if !active {
                        self.timer.unschedule();
                    }
                }
            }
        }
    }

    /// One task activation: pull and emit a packet if the bucket allows, or work out when it
    /// will.
    fn run_task(&mut self, cx: &mut Context<'_>) -> Step {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        self.bucket.fill_now(&self.rate, &self.clock);

        if !self.bucket.contains(&self.rate, self.threshold) {
            let wait = self.bucket.epochs_until_contains(&self.rate, self.threshold);
            return Step::Sleep(self.clock.instant(self.bucket.epoch() + wait));
        }

        self.stats.pulls.fetch_add(1, Ordering::Relaxed);
        match self.input.poll_pull(cx) {
            Poll::Ready(Some(packet)) => {
                let len = packet.len();
                let cost = match self.unit {
                    RateUnit::Packets => 1,
                    RateUnit::Bytes => Token::try_from(len).unwrap_or(Token::MAX),
                };
                self.bucket.remove(&self.rate, cost.min(self.rate.burst().max(1)));

                trace!(len, "emitting packet");
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(len as u64, Ordering::Relaxed);
                self.output.push(packet);
                Step::Again
            }
            Poll::Ready(None) => Step::Done,
            Poll::Pending => {
                self.stats.failed_pulls.fetch_add(1, Ordering::Relaxed);
                if self.input.notifies() {
                    Step::Wait
                } else {
                    Step::Again
                }
            }
        }
    }
}

impl<I: Pull + Unpin, O: Push + Unpin> Future for RatedUnqueueDriver<I, O> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            this.poll_commands(cx);

            if !this.active || this.rate.is_idle() {
                return Poll::Pending;
            }

            if this.timer.scheduled() && this.timer.poll_fire(cx).is_pending() {
                return Poll::Pending;
            }

            match this.run_task(cx) {
                Step::Again => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Step::Sleep(deadline) => {
                    // Loop around to register the timer.
                    this.timer.schedule_at(deadline);
                }
                Step::Wait => return Poll::Pending,
                Step::Done => {
                    debug!(pushed = this.stats.pushed(), "input closed, stopping");
                    return Poll::Ready(());
                }
            }
        }
    }
}
