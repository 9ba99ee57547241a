use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use flowkit_common::Timestamp;
use flowkit_packet::{ether::EtherHeader, Packet};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::{ConfigError, ConfigErrors};

/// EtherType of link-level acknowledgements.
pub const ETHERTYPE_ACK: u16 = 0x7ffd;

/// Options for an [`AckRetrySender`].
#[derive(Debug, Clone)]
pub struct AckRetrySenderOptions {
    /// Transmissions per packet, including the first. 1 disables retries.
    max_tries: u32,
    /// Time to wait for an ACK before retransmitting.
    timeout: Duration,
    /// Log unexpected and mismatched ACKs.
    verbose: bool,
    /// Transmission results kept in the history.
    history_len: usize,
    ack_ethertype: u16,
}

impl Default for AckRetrySenderOptions {
    fn default() -> Self {
        Self {
            max_tries: 16,
            timeout: Duration::from_millis(10),
            verbose: true,
            history_len: 500,
            ack_ethertype: ETHERTYPE_ACK,
        }
    }
}

impl AckRetrySenderOptions {
    /// Sets the transmissions per packet.
    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Sets the ACK timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether unexpected ACKs are logged.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the history capacity.
    pub fn history_len(mut self, history_len: usize) -> Self {
        self.history_len = history_len;
        self
    }

    /// Sets the EtherType that marks ACK frames.
    pub fn ack_ethertype(mut self, ethertype: u16) -> Self {
        self.ack_ethertype = ethertype;
        self
    }
}

/// The outcome of sending one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxResult {
    /// The packet's timestamp annotation.
    pub timestamp: Option<Timestamp>,
    /// Times the packet was sent.
    pub transmissions: u32,
    /// Whether it was acknowledged.
    pub success: bool,
}

impl fmt::Display for TxResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.unwrap_or(Timestamp::ZERO);
        let outcome = if self.success { "succ" } else { "fail" };
        write!(f, "{ts}\t{}\t{outcome}", self.transmissions)
    }
}

/// Aggregate figures over a [`TxHistory`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxSummary {
    /// Results recorded.
    pub packets: usize,
    /// Acknowledged packets.
    pub success: usize,
    /// Packets given up on.
    pub fail: usize,
    /// Fewest transmissions of any packet.
    pub min_transmissions: u32,
    /// Most transmissions of any packet.
    pub max_transmissions: u32,
    /// Mean transmissions per packet.
    pub avg_transmissions: f64,
}

impl fmt::Display for TxSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "packets: {}", self.packets)?;
        writeln!(f, "success: {}", self.success)?;
        writeln!(f, "fail: {}", self.fail)?;
        writeln!(f, "min_txc: {}", self.min_transmissions)?;
        writeln!(f, "max_txc: {}", self.max_transmissions)?;
        writeln!(f, "avg_txc: {:.3}", self.avg_transmissions)
    }
}

/// The most recent transmission results, oldest first.
#[derive(Debug, Default)]
pub struct TxHistory {
    entries: VecDeque<TxResult>,
    capacity: usize,
}

impl TxHistory {
    /// An empty history keeping at most `capacity` results.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    fn record(&mut self, result: TxResult) {
        self.entries.push_back(result);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Iterates over the results, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TxResult> {
        self.entries.iter()
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no results are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every result.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Summarises the recorded results.
    pub fn summary(&self) -> TxSummary {
        let mut summary = TxSummary::default();
        let mut total = 0u64;

        for (i, r) in self.entries.iter().enumerate() {
            if i == 0 {
                summary.min_transmissions = r.transmissions;
                summary.max_transmissions = r.transmissions;
            } else {
                summary.min_transmissions = summary.min_transmissions.min(r.transmissions);
                summary.max_transmissions = summary.max_transmissions.max(r.transmissions);
            }

            if r.success {
                summary.success += 1;
            } else {
                summary.fail += 1;
            }
            total += u64::from(r.transmissions);
        }

        summary.packets = self.entries.len();
        if summary.packets > 0 {
            summary.avg_transmissions = total as f64 / summary.packets as f64;
        }
        summary
    }
}

/// Stop-and-wait retransmission of Ethernet frames.
///
/// Sends one packet at a time and keeps a copy until an ACK comes back from the packet's
/// destination, retransmitting the copy every `timeout` up to `max_tries` transmissions in total.
/// This type holds the state machine only; [`AckRetrySenderDriver`](super::AckRetrySenderDriver)
/// connects it to ports and a timer.
#[derive(Debug)]
pub struct AckRetrySender {
    max_tries: u32,
    timeout: Duration,
    verbose: bool,
    ack_ethertype: u16,
    /// Copy of the packet awaiting an ACK.
    waiting: Option<Packet>,
    num_tries: u32,
    /// When to retransmit `waiting`. Set iff `waiting` is.
    deadline: Option<Instant>,
    history: Arc<Mutex<TxHistory>>,
}

impl AckRetrySender {
    /// Builds the sender. Fails on a zero timeout or zero tries.
    pub fn try_new(options: AckRetrySenderOptions) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        errors.check(!options.timeout.is_zero(), || ConfigError::Zero("TIMEOUT"));
        errors.check(options.max_tries > 0, || ConfigError::Zero("MAX_TRIES"));

        errors.finish(Self {
            max_tries: options.max_tries,
            timeout: options.timeout,
            verbose: options.verbose,
            ack_ethertype: options.ack_ethertype,
            waiting: None,
            num_tries: 0,
            deadline: None,
            history: Arc::new(Mutex::new(TxHistory::with_capacity(options.history_len))),
        })
    }

    /// Whether a packet is awaiting its ACK.
    pub fn is_waiting(&self) -> bool {
        self.waiting.is_some()
    }

    /// Transmissions of the waiting packet so far.
    pub fn num_tries(&self) -> u32 {
        self.num_tries
    }

    /// When the waiting packet is due for retransmission.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The shared transmission history.
    pub fn history(&self) -> &Arc<Mutex<TxHistory>> {
        &self.history
    }

    /// Takes a freshly pulled packet at `now` and returns it for transmission. Must only be called
    /// while idle.
    pub fn on_pull(&mut self, packet: Packet, now: Instant) -> Packet {
        debug_assert!(!self.is_waiting(), "pulled while waiting for an ACK");

        if self.max_tries > 1 {
            self.waiting = Some(packet.clone());
            self.num_tries = 1;
            self.deadline = Some(now + self.timeout);
        }

        self.check();
        packet
    }

    /// Handles the retransmission timer firing at `now`. Returns the packet to send again, or
    /// `None` once the packet has used all its tries.
    pub fn on_timer(&mut self, now: Instant) -> Option<Packet> {
        let packet = self.waiting.take()?;

        if self.num_tries >= self.max_tries {
            debug!(tries = self.num_tries, "giving up on packet");
            self.record(&packet, false);
            self.num_tries = 0;
            self.deadline = None;
            self.check();
            return None;
        }

        self.num_tries += 1;
        self.deadline = Some(now + self.timeout);
        self.waiting = Some(packet.clone());
        trace!(tries = self.num_tries, "retransmitting");
        self.check();
        Some(packet)
    }

    /// Handles a packet from the ACK input. Returns true if it acknowledged the waiting packet.
    pub fn on_ack(&mut self, ack: &Packet) -> bool {
        self.check();

        let Some(waiting) = self.waiting.as_ref() else {
            if self.verbose {
                debug!("unexpected ACK");
            }
            return false;
        };

        let Some(ack_eth) = EtherHeader::parse(ack).filter(|h| h.ethertype == self.ack_ethertype)
        else {
            warn!(len = ack.len(), "non-ACK packet on ACK input");
            return false;
        };

        let matches = EtherHeader::parse(waiting)
            .is_some_and(|w| ack_eth.src == w.dst && ack_eth.dst == w.src);
        if !matches {
            if self.verbose {
                debug!(src = %ack_eth.src, dst = %ack_eth.dst, "ACK for wrong packet");
            }
            return false;
        }

        if let Some(waiting) = self.waiting.take() {
            self.record(&waiting, true);
        }
        self.num_tries = 0;
        self.deadline = None;
        self.check();
        true
    }

    fn record(&self, packet: &Packet, success: bool) {
        self.history.lock().record(TxResult {
            timestamp: packet.anno().timestamp,
            transmissions: self.num_tries,
            success,
        });
    }

    /// Verifies the state invariants.
    fn check(&self) {
        let ok = self.waiting.is_some() == self.deadline.is_some()
            && self.num_tries <= self.max_tries
            && if self.waiting.is_some() { self.num_tries >= 1 } else { self.num_tries == 0 };

        if !ok {
            error!(
                waiting = self.waiting.is_some(),
                deadline = ?self.deadline,
                tries = self.num_tries,
                max_tries = self.max_tries,
                "retry state invariant violated"
            );
        }
        debug_assert!(ok, "retry state invariant violated");
    }
}
