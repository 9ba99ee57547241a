//! Ethernet header helpers.

use pnet::{
    packet::ethernet::{EtherType, MutableEthernetPacket},
    util::MacAddr,
};

use crate::Packet;

/// Length of an Ethernet header.
pub const ETHER_HEADER_LEN: usize = 14;

/// Source, destination and type of an Ethernet frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtherHeader {
    /// Source address.
    pub src: MacAddr,
    /// Destination address.
    pub dst: MacAddr,
    /// EtherType, in host byte order.
    pub ethertype: u16,
}

impl EtherHeader {
    /// Reads the Ethernet header at the start of `packet`.
    pub fn parse(packet: &Packet) -> Option<Self> {
        let eth = packet.ether_header()?;
        Some(Self {
            src: eth.get_source(),
            dst: eth.get_destination(),
            ethertype: eth.get_ethertype().0,
        })
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; ETHER_HEADER_LEN] {
        let mut buf = [0u8; ETHER_HEADER_LEN];
        if let Some(mut eth) = MutableEthernetPacket::new(&mut buf) {
            eth.set_destination(self.dst);
            eth.set_source(self.src);
            eth.set_ethertype(EtherType(self.ethertype));
        }
        buf
    }

    /// Prepends this header to `packet`.
    pub fn encap(&self, packet: &mut Packet) {
        packet.push_header(&self.to_bytes());
    }
}

/// Reads a MAC address from the first six bytes of `bytes`.
pub fn mac_from_slice(bytes: &[u8]) -> Option<MacAddr> {
    match bytes {
        [a, b, c, d, e, f, ..] => Some(MacAddr::new(*a, *b, *c, *d, *e, *f)),
        _ => None,
    }
}

/// Returns the six octets of `mac`.
pub fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}
