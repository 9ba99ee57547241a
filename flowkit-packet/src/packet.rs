use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use flowkit_common::Timestamp;
use pnet::packet::{ethernet::EthernetPacket, ipv4::Ipv4Packet, ipv6::Ipv6Packet};

/// Per-packet metadata carried alongside the packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    /// The aggregate (flow) number assigned by an aggregator element.
    pub aggregate: u32,
    /// A small integer "color", used for example to mark flow direction.
    pub paint: u8,
    /// The packet's timestamp, if one has been set.
    pub timestamp: Option<Timestamp>,
    /// Extra bytes counted towards the packet's length (link-layer framing, for example).
    pub extra_length: u32,
    /// Next-hop IPv4 destination.
    pub dst_ip: Option<Ipv4Addr>,
    /// Next-hop IPv6 destination.
    pub dst_ip6: Option<Ipv6Addr>,
}

/// A network packet.
///
/// Cloning is cheap: the data is reference counted and only the annotations are copied. Dropping a
/// packet releases it.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    data: Bytes,
    /// Offset of the network header into `data`.
    network_header: Option<usize>,
    anno: Annotations,
}

impl Packet {
    /// Creates a packet with no network header.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), network_header: None, anno: Annotations::default() }
    }

    /// Creates a packet whose data starts with its IP header.
    pub fn ip(data: impl Into<Bytes>) -> Self {
        Self::new(data).with_network_header(0)
    }

    /// Sets the network header offset. Offsets past the end of the data clear it.
    pub fn with_network_header(mut self, offset: usize) -> Self {
        self.set_network_header(Some(offset));
        self
    }

    /// Sets the annotations.
    pub fn with_anno(mut self, anno: Annotations) -> Self {
        self.anno = anno;
        self
    }

    /// Sets (or clears) the network header offset.
    pub fn set_network_header(&mut self, offset: Option<usize>) {
        self.network_header = offset.filter(|&o| o <= self.data.len());
    }

    /// The packet bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the underlying buffer.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Length of the packet data.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet has no data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The packet annotations.
    #[inline]
    pub fn anno(&self) -> &Annotations {
        &self.anno
    }

    /// The packet annotations, mutably.
    #[inline]
    pub fn anno_mut(&mut self) -> &mut Annotations {
        &mut self.anno
    }

    /// Returns the packet length plus the extra length annotation.
    #[inline]
    pub fn wire_len(&self) -> u64 {
        self.data.len() as u64 + u64::from(self.anno.extra_length)
    }

    /// Offset of the network header, if set.
    #[inline]
    pub fn network_header_offset(&self) -> Option<usize> {
        self.network_header
    }

    /// Returns the data starting at the network header.
    pub fn network_header(&self) -> Option<&[u8]> {
        self.network_header.map(|o| &self.data[o..])
    }

    /// Parses the data starting at the network header as IPv4.
    pub fn ipv4_header(&self) -> Option<Ipv4Packet<'_>> {
        self.network_header().and_then(Ipv4Packet::new)
    }

    /// Parses the data starting at the network header as IPv6.
    pub fn ipv6_header(&self) -> Option<Ipv6Packet<'_>> {
        self.network_header().and_then(Ipv6Packet::new)
    }

    /// Parses the start of the data as an Ethernet header.
    pub fn ether_header(&self) -> Option<EthernetPacket<'_>> {
        EthernetPacket::new(&self.data)
    }

    /// Gives `f` a uniquely owned, mutable copy of the data. The data is copied only if it is
    /// shared with a clone of this packet.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut BytesMut) -> R) -> R {
        let mut buf = match std::mem::take(&mut self.data).try_into_mut() {
            Ok(buf) => buf,
            Err(shared) => BytesMut::from(&shared[..]),
        };
        let ret = f(&mut buf);
        self.data = buf.freeze();
        self.network_header = self.network_header.filter(|&o| o <= self.data.len());
        ret
    }

    /// Prepends `header` to the data. The network header offset moves with the data.
    pub fn push_header(&mut self, header: &[u8]) {
        let mut buf = BytesMut::with_capacity(header.len() + self.data.len());
        buf.put_slice(header);
        buf.put_slice(&self.data);
        self.data = buf.freeze();
        self.network_header = self.network_header.map(|o| o + header.len());
    }

    /// Removes the first `len` bytes of data, returning false (and leaving the packet unchanged)
    /// if the packet is shorter than that.
    pub fn pull_header(&mut self, len: usize) -> bool {
        if len > self.data.len() {
            return false;
        }

        let _ = self.data.split_to(len);
        self.network_header = self.network_header.and_then(|o| o.checked_sub(len));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_data_until_modified() {
        let mut a = Packet::ip(vec![0x45u8; 20]);
        let b = a.clone();
        assert_eq!(a.bytes().as_ptr(), b.bytes().as_ptr());

        a.modify(|buf| buf[0] = 0x46);
        assert_eq!(a.data()[0], 0x46);
        assert_eq!(b.data()[0], 0x45);
        assert_eq!(a.network_header_offset(), Some(0));
    }

    #[test]
    fn header_push_and_pull_track_network_header() {
        let mut p = Packet::ip(Bytes::from_static(&[1, 2, 3, 4]));
        p.push_header(&[9; 14]);
        assert_eq!(p.len(), 18);
        assert_eq!(p.network_header(), Some(&[1u8, 2, 3, 4][..]));

        assert!(!p.pull_header(19));
        assert!(p.pull_header(14));
        assert_eq!(p.data(), &[1, 2, 3, 4]);
        assert_eq!(p.network_header_offset(), Some(0));
    }

    #[test]
    fn wire_len_counts_extra_length() {
        let mut p = Packet::new(vec![0u8; 100]);
        p.anno_mut().extra_length = 24;
        assert_eq!(p.wire_len(), 124);
        assert!(p.clone().with_network_header(101).network_header().is_none());
    }
}
