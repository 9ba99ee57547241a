//! IPv6 Neighbor Discovery messages carried over Ethernet.
//!
//! Only the two messages needed for address resolution are handled: the Neighbor Solicitation,
//! carrying a source link-layer address option, and the Neighbor Advertisement, carrying a target
//! link-layer address option.

use std::net::Ipv6Addr;

use bytes::BytesMut;
use pnet::{
    packet::{
        ethernet::EtherTypes,
        icmpv6::{self, ndp::NeighborAdvertPacket, Icmpv6Packet, Icmpv6Types, MutableIcmpv6Packet},
        ip::IpNextHeaderProtocols,
        ipv6::{Ipv6Packet, MutableIpv6Packet},
        Packet as _,
    },
    util::MacAddr,
};

use crate::{
    ether::{mac_from_slice, mac_octets, EtherHeader, ETHER_HEADER_LEN},
    Packet,
};

const IPV6_HEADER_LEN: usize = 40;
/// Length of an ND message body with one link-layer address option.
const ND_MESSAGE_LEN: usize = 32;
/// Length of a complete Ethernet-framed ND message.
pub const ND_FRAME_LEN: usize = ETHER_HEADER_LEN + IPV6_HEADER_LEN + ND_MESSAGE_LEN;

const OPTION_SOURCE_LLADDR: u8 = 1;
const OPTION_TARGET_LLADDR: u8 = 2;
const OPTIONS_OFFSET: usize = 24;

/// Solicited, override.
const ADVERT_FLAGS: u8 = 0x60;

/// Returns the solicited-node multicast address for `target`.
pub fn solicited_node(target: Ipv6Addr) -> Ipv6Addr {
    let t = target.octets();
    let mut a = [0u8; 16];
    a[0] = 0xff;
    a[1] = 0x02;
    a[11] = 0x01;
    a[12] = 0xff;
    a[13..].copy_from_slice(&t[13..]);
    Ipv6Addr::from(a)
}

/// Returns the Ethernet multicast address that `solicited_node(target)` maps to.
pub fn solicited_node_mac(target: Ipv6Addr) -> MacAddr {
    let t = target.octets();
    MacAddr::new(0x33, 0x33, 0xff, t[13], t[14], t[15])
}

/// Builds an Ethernet-framed Neighbor Solicitation for `target`, sent from `src_ip`/`src_mac`.
pub fn neighbor_solicitation(src_ip: Ipv6Addr, src_mac: MacAddr, target: Ipv6Addr) -> Packet {
    let dst_ip = solicited_node(target);
    let eth = EtherHeader {
        src: src_mac,
        dst: solicited_node_mac(target),
        ethertype: EtherTypes::Ipv6.0,
    };
    build(eth, src_ip, dst_ip, |body| {
        body[0] = Icmpv6Types::NeighborSolicit.0;
        body[8..24].copy_from_slice(&target.octets());
        body[24] = OPTION_SOURCE_LLADDR;
        body[25] = 1;
        body[26..32].copy_from_slice(&mac_octets(src_mac));
    })
}

/// Builds an Ethernet-framed Neighbor Advertisement announcing that `target` is at `target_mac`,
/// addressed to `dst_ip`/`dst_mac`.
pub fn neighbor_advertisement(
    target: Ipv6Addr,
    target_mac: MacAddr,
    dst_ip: Ipv6Addr,
    dst_mac: MacAddr,
) -> Packet {
    let eth = EtherHeader { src: target_mac, dst: dst_mac, ethertype: EtherTypes::Ipv6.0 };
    build(eth, target, dst_ip, |body| {
        body[0] = Icmpv6Types::NeighborAdvert.0;
        body[4] = ADVERT_FLAGS;
        body[8..24].copy_from_slice(&target.octets());
        body[24] = OPTION_TARGET_LLADDR;
        body[25] = 1;
        body[26..32].copy_from_slice(&mac_octets(target_mac));
    })
}

fn build(eth: EtherHeader, src: Ipv6Addr, dst: Ipv6Addr, fill: impl FnOnce(&mut [u8])) -> Packet {
    let mut buf = BytesMut::zeroed(ND_FRAME_LEN);
    buf[..ETHER_HEADER_LEN].copy_from_slice(&eth.to_bytes());

    let (ip, body) = buf[ETHER_HEADER_LEN..].split_at_mut(IPV6_HEADER_LEN);
    if let Some(mut ip6) = MutableIpv6Packet::new(ip) {
        ip6.set_version(6);
        ip6.set_payload_length(ND_MESSAGE_LEN as u16);
        ip6.set_next_header(IpNextHeaderProtocols::Icmpv6);
        ip6.set_hop_limit(255);
        ip6.set_source(src);
        ip6.set_destination(dst);
    }

    fill(&mut *body);
    let sum = Icmpv6Packet::new(&*body).map(|icmp| icmpv6::checksum(&icmp, &src, &dst));
    if let (Some(sum), Some(mut icmp)) = (sum, MutableIcmpv6Packet::new(body)) {
        icmp.set_checksum(sum);
    }

    let mut p = Packet::new(buf.freeze()).with_network_header(ETHER_HEADER_LEN);
    p.anno_mut().dst_ip6 = Some(dst);
    p
}

/// A parsed Neighbor Advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborAdvert {
    /// The address being advertised.
    pub target: Ipv6Addr,
    /// The link-layer address of `target`.
    pub target_mac: MacAddr,
}

impl NeighborAdvert {
    /// Parses an Ethernet-framed Neighbor Advertisement. Returns `None` for anything else,
    /// including frames too short to hold the target link-layer address option.
    pub fn parse(packet: &Packet) -> Option<Self> {
        let data = packet.data();
        if data.len() < ND_FRAME_LEN {
            return None;
        }

        if EtherHeader::parse(packet)?.ethertype != EtherTypes::Ipv6.0 {
            return None;
        }

        let ip6 = Ipv6Packet::new(&data[ETHER_HEADER_LEN..])?;
        if ip6.get_next_header() != IpNextHeaderProtocols::Icmpv6 {
            return None;
        }

        let body = &data[ETHER_HEADER_LEN + IPV6_HEADER_LEN..];
        if Icmpv6Packet::new(body)?.get_icmpv6_type() != Icmpv6Types::NeighborAdvert {
            return None;
        }

        let target = NeighborAdvertPacket::new(body)?.get_target_addr();
        let target_mac = target_lladdr(&body[OPTIONS_OFFSET..])?;
        Some(Self { target, target_mac })
    }
}

/// Finds the target link-layer address among ND options.
fn target_lladdr(mut options: &[u8]) -> Option<MacAddr> {
    while let [kind, len, ..] = *options {
        let len = usize::from(len) * 8;
        if len == 0 || len > options.len() {
            return None;
        }

        if kind == OPTION_TARGET_LLADDR {
            return mac_from_slice(&options[2..len]);
        }

        options = &options[len..];
    }

    None
}

/// Returns true if the ICMPv6 checksum of `packet` is correct.
pub fn checksum_ok(packet: &Packet) -> bool {
    let Some(ip6) = packet.ipv6_header() else { return false };
    let Some(icmp) = Icmpv6Packet::new(ip6.payload()) else { return false };
    icmpv6::checksum(&icmp, &ip6.get_source(), &ip6.get_destination()) == icmp.get_checksum()
}
