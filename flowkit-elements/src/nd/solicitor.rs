use std::{
    fmt,
    net::Ipv6Addr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use flowkit_packet::{
    ether::EtherHeader,
    nd::{neighbor_solicitation, NeighborAdvert},
    MacAddr, Outputs, Packet, Push,
};
use pnet::packet::ethernet::EtherTypes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{ConfigError, ConfigErrors};

const NBUCKETS: usize = 256;

/// How often resolved entries are aged.
pub const EXPIRE_INTERVAL: Duration = Duration::from_secs(15);
/// Age after which a resolved entry is refreshed by the next packet sent to it.
pub const POLL_AFTER: Duration = Duration::from_secs(60);
/// Age after which a resolved entry is forgotten.
pub const FORGET_AFTER: Duration = Duration::from_secs(120);

#[inline]
fn bucket_of(ip: &Ipv6Addr) -> usize {
    let o = ip.octets();
    (usize::from(o[0]) + usize::from(o[15])) % NBUCKETS
}

/// A neighbour cache entry.
#[derive(Debug)]
struct NdEntry {
    ip: Ipv6Addr,
    mac: MacAddr,
    last_response: Instant,
    /// Resolved.
    ok: bool,
    /// The next packet to this neighbour also sends a solicitation.
    polling: bool,
    /// The latest packet waiting for resolution.
    pending: Option<Packet>,
}

/// One line of the neighbour table dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdTableEntry {
    /// The neighbour's address.
    pub ip: Ipv6Addr,
    /// Whether the neighbour is resolved.
    pub ok: bool,
    /// All zeroes until resolved.
    pub mac: MacAddr,
}

impl fmt::Display for NdTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.ip, u8::from(self.ok), self.mac)
    }
}

/// Counters shared between the solicitor and its handles.
#[derive(Debug, Default)]
pub struct NdStats {
    queries_sent: AtomicU64,
    packets_killed: AtomicU64,
}

impl NdStats {
    /// Neighbour solicitations sent.
    #[inline]
    pub fn queries_sent(&self) -> u64 {
        self.queries_sent.load(Ordering::Relaxed)
    }

    /// Packets dropped: replaced while waiting for resolution, or with no destination.
    #[inline]
    pub fn packets_killed(&self) -> u64 {
        self.packets_killed.load(Ordering::Relaxed)
    }
}

/// Options for an [`Ip6NdSolicitor`].
#[derive(Debug, Clone)]
pub struct Ip6NdSolicitorOptions {
    /// Our IPv6 address, the source of every solicitation.
    ip: Ipv6Addr,
    /// Our Ethernet address.
    mac: MacAddr,
    /// 1: solicitations share output 0 with data. 2: solicitations go to output 1.
    outputs: usize,
}

impl Ip6NdSolicitorOptions {
    /// Options for a solicitor answering for `ip` at `mac`.
    pub fn new(ip: Ipv6Addr, mac: MacAddr) -> Self {
        Self { ip, mac, outputs: 1 }
    }

    /// Sets the number of output ports, 1 or 2.
    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Resolves IPv6 next hops to Ethernet addresses with neighbour solicitations.
///
/// IPv6 packets come in with their next hop in the `dst_ip6` annotation and leave on output 0
/// with an Ethernet header. A packet for an unresolved neighbour is held (only the latest one per
/// neighbour) while a solicitation goes out on the last output. Neighbour advertisements resolve
/// entries and release their held packet.
pub struct Ip6NdSolicitor {
    ip: Ipv6Addr,
    mac: MacAddr,
    buckets: Vec<Vec<NdEntry>>,
    outputs: Outputs,
    stats: Arc<NdStats>,
}

impl fmt::Debug for Ip6NdSolicitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ip6NdSolicitor")
            .field("ip", &self.ip)
            .field("mac", &self.mac)
            .field("entries", &self.len())
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Ip6NdSolicitor {
    /// Builds the solicitor. Fails unless it has one or two outputs.
    pub fn try_new(options: Ip6NdSolicitorOptions) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        errors.check((1..=2).contains(&options.outputs), || ConfigError::OutOfRange {
            field: "number of outputs",
            value: options.outputs as u64,
            max: 2,
        });

        errors.finish(Self {
            ip: options.ip,
            mac: options.mac,
            buckets: (0..NBUCKETS).map(|_| Vec::new()).collect(),
            outputs: Outputs::new(options.outputs),
            stats: Arc::default(),
        })
    }

    /// Connects output `port`.
    pub fn connect(mut self, port: usize, sink: impl Push + Send + 'static) -> Self {
        self.outputs = self.outputs.connect(port, sink);
        self
    }

    /// Our IPv6 address.
    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    /// Our Ethernet address.
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// The shared counters.
    pub fn stats(&self) -> &Arc<NdStats> {
        &self.stats
    }

    /// Number of neighbour entries, resolved or not.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dumps the neighbour table.
    pub fn table(&self) -> Vec<NdTableEntry> {
        self.buckets
            .iter()
            .flatten()
            .map(|e| NdTableEntry { ip: e.ip, ok: e.ok, mac: e.mac })
            .collect()
    }

    fn send_query(&mut self, target: Ipv6Addr) {
        trace!(%target, "sending neighbour solicitation");
        self.stats.queries_sent.fetch_add(1, Ordering::Relaxed);
        let query = neighbor_solicitation(self.ip, self.mac, target);
        let port = self.outputs.len() - 1;
        self.outputs.checked_push(port, query);
    }

    /// Sends an IPv6 packet towards its next hop, or holds it until the next hop is resolved.
    pub fn handle_ip6(&mut self, packet: Packet) {
        let dst = packet
            .anno()
            .dst_ip6
            .or_else(|| packet.ipv6_header().map(|ip6| ip6.get_destination()));
        let Some(dst) = dst else {
            trace!(len = packet.len(), "no IPv6 destination, dropping packet");
            self.stats.packets_killed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let bucket = &mut self.buckets[bucket_of(&dst)];
        let (query, forward) = match bucket.iter_mut().find(|e| e.ip == dst) {
            Some(entry) if entry.ok => {
                (std::mem::take(&mut entry.polling), Some((packet, entry.mac)))
            }
            Some(entry) => {
                entry.polling = false;
                if entry.pending.replace(packet).is_some() {
                    trace!(%dst, "replacing packet waiting for resolution");
                    self.stats.packets_killed.fetch_add(1, Ordering::Relaxed);
                }
                (true, None)
            }
            None => {
                bucket.insert(
                    0,
                    NdEntry {
                        ip: dst,
                        mac: MacAddr::zero(),
                        last_response: Instant::now(),
                        ok: false,
                        polling: false,
                        pending: Some(packet),
                    },
                );
                (true, None)
            }
        };

        if query {
            self.send_query(dst);
        }

        if let Some((mut packet, mac)) = forward {
            let header = EtherHeader { src: self.mac, dst: mac, ethertype: EtherTypes::Ipv6.0 };
            header.encap(&mut packet);
            self.outputs.checked_push(0, packet);
        }
    }

    /// Learns from a neighbour advertisement received at `now`. Anything else is ignored.
    pub fn handle_response(&mut self, packet: &Packet, now: Instant) {
        let Some(advert) = NeighborAdvert::parse(packet) else {
            trace!(len = packet.len(), "not a neighbour advertisement");
            return;
        };

        let bucket = &mut self.buckets[bucket_of(&advert.target)];
        let Some(entry) = bucket.iter_mut().find(|e| e.ip == advert.target) else {
            debug!(target = %advert.target, "advertisement for unknown neighbour");
            return;
        };

        if entry.ok && entry.mac != advert.target_mac {
            warn!(
                target = %advert.target,
                old = %entry.mac,
                new = %advert.target_mac,
                "overwriting neighbour entry"
            );
        }

        entry.mac = advert.target_mac;
        entry.ok = true;
        entry.polling = false;
        entry.last_response = now;

        if let Some(pending) = entry.pending.take() {
            self.handle_ip6(pending);
        }
    }

    /// Ages resolved entries as of `now`: stale ones are polled, dead ones forgotten.
    pub fn expire(&mut self, now: Instant) {
        for bucket in &mut self.buckets {
            bucket.retain_mut(|entry| {
                if !entry.ok {
                    return true;
                }

                let age = now.saturating_duration_since(entry.last_response);
                if age > FORGET_AFTER {
                    debug!(ip = %entry.ip, "forgetting neighbour");
                    false
                } else {
                    if age > POLL_AFTER {
                        entry.polling = true;
                    }
                    true
                }
            });
        }
    }
}
