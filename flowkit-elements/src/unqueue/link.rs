use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use flowkit_packet::{Packet, Pull, Push};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, trace, Instrument};

use crate::{
    timer::{Step, Timer},
    ConfigError, ConfigErrors, HandleError,
};

/// Slowest link a [`LinkUnqueue`] accepts, in bytes per second.
pub const MIN_BANDWIDTH: u64 = 100;

/// Options for a [`LinkUnqueue`].
#[derive(Debug, Clone)]
pub struct LinkUnqueueOptions {
    /// Propagation delay added to every packet.
    latency: Duration,
    /// Link speed in bytes per second.
    bandwidth: u64,
    /// Waits shorter than this are spun through the task instead of the timer.
    timer_slack: Duration,
}

impl LinkUnqueueOptions {
    /// Options for a link with `latency` and `bandwidth` bytes per second.
    pub fn new(latency: Duration, bandwidth: u64) -> Self {
        Self { latency, bandwidth, timer_slack: Duration::from_millis(5) }
    }

    /// Sets the timer slack. Zero always sleeps on the timer.
    pub fn timer_slack(mut self, slack: Duration) -> Self {
        self.timer_slack = slack;
        self
    }
}

/// Counters shared between a link unqueue's driver and its handles.
#[derive(Debug, Default)]
pub struct LinkUnqueueStats {
    /// Packets currently on the link.
    size: AtomicUsize,
    pulled: AtomicU64,
    pushed: AtomicU64,
}

impl LinkUnqueueStats {
    /// Packets currently on the link.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Packets pulled from the input.
    #[inline]
    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }

    /// Packets released to the output.
    #[inline]
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
enum Command {
    Reset,
}

/// A handle to a running link unqueue.
#[derive(Debug, Clone)]
pub struct LinkUnqueueHandle {
    to_driver: mpsc::UnboundedSender<Command>,
    latency: Duration,
    bandwidth: u64,
    stats: Arc<LinkUnqueueStats>,
}

impl LinkUnqueueHandle {
    /// Number of packets in flight.
    pub fn size(&self) -> usize {
        self.stats.size()
    }

    /// The link latency.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// The link speed in bytes per second.
    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    /// The shared counters.
    pub fn stats(&self) -> &LinkUnqueueStats {
        &self.stats
    }

    /// Drops every packet in flight.
    pub fn reset(&self) -> Result<(), HandleError> {
        self.to_driver.send(Command::Reset).map_err(|_| HandleError::DriverStopped)
    }
}

/// Emulates a serial link with fixed latency and bandwidth.
///
/// Each packet pulled from the input is released to the output at
/// `max(now + latency, previous release) + wire_len / bandwidth`, so packets never overlap on the
/// wire and leave in the order they entered. The element only pulls while the link has room: when
/// the last packet on it would be released within one latency of now.
#[derive(Debug)]
pub struct LinkUnqueue {
    latency: Duration,
    bandwidth: u64,
    timer_slack: Duration,
}

impl LinkUnqueue {
    /// Builds the element. Fails if the bandwidth is below [`MIN_BANDWIDTH`].
    pub fn try_new(options: LinkUnqueueOptions) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        errors.check(options.bandwidth >= MIN_BANDWIDTH, || {
            ConfigError::BandwidthTooSmall(options.bandwidth)
        });

        errors.finish(Self {
            latency: options.latency,
            bandwidth: options.bandwidth,
            timer_slack: options.timer_slack,
        })
    }

    /// Binds the element to its ports, returning the driver future and a handle to it.
    pub fn into_driver<I, O>(
        self,
        input: I,
        output: O,
    ) -> (LinkUnqueueDriver<I, O>, LinkUnqueueHandle)
    where
        I: Pull + Unpin,
        O: Push + Unpin,
    {
        let (to_driver, from_handle) = mpsc::unbounded_channel();
        let stats = Arc::new(LinkUnqueueStats::default());

        let handle = LinkUnqueueHandle {
            to_driver,
            latency: self.latency,
            bandwidth: self.bandwidth,
            stats: Arc::clone(&stats),
        };

        let driver = LinkUnqueueDriver {
            input,
            output,
            link: self,
            queue: VecDeque::new(),
            input_open: true,
            last_pull_pending: false,
            timer: Timer::default(),
            from_handle,
            stats,
        };

        (driver, handle)
    }

    /// Binds the element to its ports and spawns the driver on the tokio runtime.
    pub fn spawn<I, O>(self, input: I, output: O) -> LinkUnqueueHandle
    where
        I: Pull + Unpin + Send + 'static,
        O: Push + Unpin + Send + 'static,
    {
        let span = tracing::debug_span!(
            "link_unqueue",
            latency = ?self.latency,
            bandwidth = self.bandwidth
        );
        let (driver, handle) = self.into_driver(input, output);
        tokio::spawn(driver.instrument(span));
        handle
    }

    /// Time `packet` occupies the wire.
    fn transmission_delay(&self, packet: &Packet) -> Duration {
        let nanos = u128::from(packet.wire_len()) * 1_000_000_000 / u128::from(self.bandwidth);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Drives a [`LinkUnqueue`]. Completes once its input closes and the link drains.
#[derive(Debug)]
pub struct LinkUnqueueDriver<I, O> {
    input: I,
    output: O,
    link: LinkUnqueue,
    /// Packets on the link with their release times, oldest first.
    queue: VecDeque<(Instant, Packet)>,
    input_open: bool,
    /// Whether the last pull found the input empty.
    last_pull_pending: bool,
    timer: Timer,
    from_handle: mpsc::UnboundedReceiver<Command>,
    stats: Arc<LinkUnqueueStats>,
}

impl<I: Pull, O: Push> LinkUnqueueDriver<I, O> {
    fn poll_commands(&mut self, cx: &mut Context<'_>) {
        while let Poll::Ready(Some(cmd)) = self.from_handle.poll_recv(cx) {
            match cmd {
                Command::Reset => {
                    debug!(dropped = self.queue.len(), "resetting link");
                    self.queue.clear();
                    self.stats.size.store(0, Ordering::Relaxed);
                    self.timer.unschedule();
                }
            }
        }
    }

    /// Whether the input may have packets for us without waking the task.
    fn signal(&self) -> bool {
        self.input_open && (!self.last_pull_pending || !self.input.notifies())
    }

    fn run_task(&mut self, cx: &mut Context<'_>) -> Step {
        let now = Instant::now();
        let now_delayed = now + self.link.latency;

        // Fill the link while it has room.
        self.last_pull_pending = false;
        while self.input_open
            && self.queue.back().map_or(true, |(release, _)| now_delayed >= *release)
        {
            match self.input.poll_pull(cx) {
                Poll::Ready(Some(packet)) => {
                    let start = match self.queue.back() {
                        Some((tail, _)) => now_delayed.max(*tail),
                        None => now_delayed,
                    };
                    let release = start + self.link.transmission_delay(&packet);
                    trace!(len = packet.len(), in_flight = self.queue.len(), "packet entered link");

                    self.queue.push_back((release, packet));
                    self.stats.pulled.fetch_add(1, Ordering::Relaxed);
                    self.stats.size.store(self.queue.len(), Ordering::Relaxed);
                }
                Poll::Ready(None) => {
                    debug!("input closed");
                    self.input_open = false;
                }
                Poll::Pending => {
                    self.last_pull_pending = true;
                    break;
                }
            }
        }

        // Release everything that is due.
        while self.queue.front().is_some_and(|(release, _)| *release <= now) {
            let Some((_, packet)) = self.queue.pop_front() else { break };
            trace!(len = packet.len(), "packet left link");
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);
            self.stats.size.store(self.queue.len(), Ordering::Relaxed);
            self.output.push(packet);
        }

        self.schedule_next(now)
    }

    /// Picks between the task and the timer for the next activation.
    fn schedule_next(&self, now: Instant) -> Step {
        let signal = self.signal();

        let Some((head, _)) = self.queue.front() else {
            return if signal {
                Step::Again
            } else if !self.input_open {
                Step::Done
            } else {
                Step::Wait
            };
        };

        let mut expiry = *head;
        if signal {
            // The link will have room for another packet by then.
            if let Some((tail, _)) = self.queue.back() {
                let room = tail.checked_sub(self.link.latency).unwrap_or(now);
                expiry = expiry.min(room);
            }
        }

        let wake = expiry.checked_sub(self.link.timer_slack).unwrap_or(now);
        if wake <= now {
            Step::Again
        } else {
            Step::Sleep(wake)
        }
    }
}

impl<I: Pull + Unpin, O: Push + Unpin> Future for LinkUnqueueDriver<I, O> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            this.poll_commands(cx);

            match this.run_task(cx) {
                Step::Again => {
                    this.timer.unschedule();
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Step::Sleep(deadline) => {
                    this.timer.schedule_at(deadline);
                    if this.timer.poll_fire(cx).is_pending() {
                        return Poll::Pending;
                    }
                }
                Step::Wait => {
                    this.timer.unschedule();
                    return Poll::Pending;
                }
                Step::Done => {
                    debug!(pushed = this.stats.pushed(), "link drained, stopping");
                    return Poll::Ready(());
                }
            }
        }
    }
}
