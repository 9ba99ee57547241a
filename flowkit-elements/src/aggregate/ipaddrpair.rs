use std::{fmt, net::Ipv4Addr, time::Duration};

use flowkit_common::Timestamp;
use flowkit_packet::{Outputs, Packet, Push};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use super::AggregateListener;
use crate::{ConfigError, ConfigErrors};

/// An unordered pair of IPv4 addresses, stored with the smaller address first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPair {
    a: u32,
    b: u32,
}

impl HostPair {
    /// Normalizes `(src, dst)`. The returned flag is true if `src` is not the first address of the
    /// normalized pair, i.e. the packet travels in the "reverse" direction.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> (Self, bool) {
        let (mut a, mut b) = (u32::from(src), u32::from(dst));
        if a > b {
            a ^= b;
            b ^= a;
            a ^= b;
        }
        (Self { a, b }, a != u32::from(src))
    }

    /// The lower address.
    #[inline]
    pub fn a(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.a)
    }

    /// The higher address.
    #[inline]
    pub fn b(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.b)
    }
}

/// Per-pair flow state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowInfo {
    aggregate: u32,
    reverse: bool,
    last_timestamp: Timestamp,
}

impl FlowInfo {
    /// The aggregate assigned to this flow. Zero means "not assigned".
    #[inline]
    pub fn aggregate(&self) -> u32 {
        self.aggregate
    }

    /// Whether the flow's first packet travelled in the reverse direction.
    #[inline]
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    /// Timestamp of the flow's most recent packet.
    #[inline]
    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }
}

/// Options for an [`AggregateIPAddrPair`].
#[derive(Debug, Clone)]
pub struct AggregateIPAddrPairOptions {
    /// Flows idle for longer than this are expired. Zero means flows never expire.
    timeout: Duration,
    /// The minimum time between two reaps of expired flows.
    reap_interval: Duration,
}

impl Default for AggregateIPAddrPairOptions {
    fn default() -> Self {
        Self { timeout: Duration::ZERO, reap_interval: Duration::from_secs(20 * 60) }
    }
}

impl AggregateIPAddrPairOptions {
    /// Sets the flow timeout. Zero disables expiry.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the reap interval.
    pub fn reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    fn validate(&self) -> Result<(), ConfigErrors> {
        let mut errors = ConfigErrors::new();
        errors.check(self.reap_interval.as_secs() > 0, || ConfigError::Zero("REAP"));
        errors.check(self.timeout.as_secs() <= i64::MAX as u64, || ConfigError::OutOfRange {
            field: "TIMEOUT",
            value: self.timeout.as_secs(),
            max: i64::MAX as u64,
        });
        errors.finish(())
    }
}

/// Assigns aggregate annotations by IP address pair.
///
/// Every packet between the same two hosts, in either direction, gets the same aggregate. The
/// paint annotation is 0 for packets travelling in the same direction as the flow's first packet
/// and 1 for the others.
///
/// Output 0 receives annotated packets. Packets without an IP header go to output 1, or are
/// dropped if it is not connected.
pub struct AggregateIPAddrPair {
    flows: FxHashMap<HostPair, FlowInfo>,
    /// Next aggregate to hand out. Never zero.
    next: u32,
    timeout: Timestamp,
    reap_interval: i64,
    /// Second of the latest packet timestamp seen.
    active_sec: i64,
    /// The first reap happens once the active second passes this.
    next_reap: Option<i64>,
    timestamp_warning: bool,
    listeners: Vec<Box<dyn AggregateListener>>,
    outputs: Outputs,
}

impl fmt::Debug for AggregateIPAddrPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateIPAddrPair")
            .field("flows", &self.flows.len())
            .field("next", &self.next)
            .field("timeout", &self.timeout)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl AggregateIPAddrPair {
    /// Creates the element with the default options: flows never expire.
    pub fn new() -> Self {
        Self::build(&AggregateIPAddrPairOptions::default())
    }

    /// Builds the element with flow expiry.
    pub fn try_new(options: AggregateIPAddrPairOptions) -> Result<Self, ConfigErrors> {
        options.validate()?;
        Ok(Self::build(&options))
    }

    fn build(options: &AggregateIPAddrPairOptions) -> Self {
        Self {
            flows: FxHashMap::default(),
            next: 1,
            timeout: Timestamp::from(options.timeout),
            reap_interval: options.reap_interval.as_secs() as i64,
            active_sec: 0,
            next_reap: None,
            timestamp_warning: false,
            listeners: Vec::new(),
            outputs: Outputs::new(2),
        }
    }

    /// Connects output `port` (0 for annotated packets, 1 for packets without an IP header).
    pub fn connect(mut self, port: usize, sink: impl Push + Send + 'static) -> Self {
        self.outputs = self.outputs.connect(port, sink);
        self
    }

    /// Registers a listener for aggregate creation and deletion.
    pub fn with_listener(mut self, listener: impl AggregateListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Number of tracked address pairs.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Returns the flow between `a` and `b`, in either order.
    pub fn lookup(&self, a: Ipv4Addr, b: Ipv4Addr) -> Option<&FlowInfo> {
        self.flows.get(&HostPair::new(a, b).0)
    }

    /// Annotates `packet` with its aggregate and paint. Returns `None` if the packet had no IP
    /// header, in which case it was sent to output 1.
    pub fn simple_action(&mut self, mut packet: Packet) -> Option<Packet> {
        let Some((src, dst)) =
            packet.ipv4_header().map(|ip| (ip.get_source(), ip.get_destination()))
        else {
            trace!(len = packet.len(), "packet without IP header");
            self.outputs.checked_push(1, packet);
            return None;
        };

        let (hosts, reversed) = HostPair::new(src, dst);

        let expires = !self.timeout.is_zero();
        let timestamp = if expires {
            self.ensure_timestamp(&mut packet)
        } else {
            packet.anno().timestamp.unwrap_or_default()
        };

        let flow = self.flows.entry(hosts).or_default();

        if expires && flow.aggregate != 0 && flow.last_timestamp < timestamp - self.timeout {
            debug!(aggregate = flow.aggregate, %src, %dst, "flow expired");
            for listener in self.listeners.iter_mut() {
                listener.on_delete_aggregate(flow.aggregate);
            }
            flow.aggregate = 0;
        }

        if flow.aggregate == 0 {
            flow.aggregate = self.next;
            flow.reverse = reversed;
            self.next = self.next.wrapping_add(1);
            if self.next == 0 {
                self.next = 1;
            }

            trace!(aggregate = flow.aggregate, %src, %dst, "new flow");
            for listener in self.listeners.iter_mut() {
                listener.on_new_aggregate(flow.aggregate, &packet);
            }
        }

        flow.last_timestamp = timestamp;

        let anno = packet.anno_mut();
        anno.aggregate = flow.aggregate;
        anno.paint = u8::from(reversed ^ flow.reverse);

        if expires {
            self.active_sec = timestamp.sec();
            if self.next_reap.map_or(true, |at| self.active_sec > at) {
                self.reap();
            }
        }

        Some(packet)
    }

    fn ensure_timestamp(&mut self, packet: &mut Packet) -> Timestamp {
        if let Some(timestamp) = packet.anno().timestamp {
            return timestamp;
        }

        if !self.timestamp_warning {
            warn!("packet received without timestamp");
            self.timestamp_warning = true;
        }

        let now = Timestamp::now();
        packet.anno_mut().timestamp = Some(now);
        now
    }

    /// Removes every flow idle since before `active_sec - timeout`, then schedules the next reap.
    /// The first call only schedules.
    fn reap(&mut self) {
        if self.next_reap.is_some() {
            let cutoff = Timestamp::new(self.active_sec, 0) - self.timeout;
            self.reap_older_than(cutoff);
        }
        self.next_reap = Some(self.active_sec.saturating_add(self.reap_interval));
    }

    fn reap_older_than(&mut self, cutoff: Timestamp) {
        let listeners = &mut self.listeners;
        let before = self.flows.len();

        self.flows.retain(|_, flow| {
            if flow.last_timestamp >= cutoff {
                return true;
            }
            if flow.aggregate != 0 {
                for listener in listeners.iter_mut() {
                    listener.on_delete_aggregate(flow.aggregate);
                }
            }
            false
        });

        debug!(reaped = before - self.flows.len(), remaining = self.flows.len(), "reaped flows");
    }

    /// Forgets every flow regardless of age, notifying listeners of each deletion.
    pub fn clear(&mut self) {
        let listeners = &mut self.listeners;
        for (_, flow) in self.flows.drain() {
            if flow.aggregate != 0 {
                for listener in listeners.iter_mut() {
                    listener.on_delete_aggregate(flow.aggregate);
                }
            }
        }
    }
}

impl Default for AggregateIPAddrPair {
    fn default() -> Self {
        Self::new()
    }
}

impl Push for AggregateIPAddrPair {
    fn push(&mut self, packet: Packet) {
        if let Some(packet) = self.simple_action(packet) {
            self.outputs.checked_push(0, packet);
        }
    }
}
