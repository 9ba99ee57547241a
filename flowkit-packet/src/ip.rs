//! Minimal IPv4 and IPv6 packet construction.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;
use pnet::packet::{
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::{self, MutableIpv4Packet},
    ipv6::MutableIpv6Packet,
};

use crate::Packet;

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Builds an IPv4 packet from `src` to `dst` carrying `payload` as UDP. The network header is set
/// and so is the destination address annotation.
pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Packet {
    ipv4_with_protocol(src, dst, IpNextHeaderProtocols::Udp, payload)
}

/// Like [`ipv4`], with an explicit protocol number.
pub fn ipv4_with_protocol(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
) -> Packet {
    let len = IPV4_HEADER_LEN + payload.len();
    let mut buf = BytesMut::zeroed(len);
    buf[IPV4_HEADER_LEN..].copy_from_slice(payload);

    if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(len.min(usize::from(u16::MAX)) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(protocol);
        ip.set_source(src);
        ip.set_destination(dst);
        let sum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(sum);
    }

    let mut p = Packet::ip(buf.freeze());
    p.anno_mut().dst_ip = Some(dst);
    p
}

/// Builds an IPv6 packet from `src` to `dst` carrying `payload` as UDP. The network header is set
/// and so is the IPv6 destination address annotation.
pub fn ipv6(src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) -> Packet {
    let mut buf = BytesMut::zeroed(IPV6_HEADER_LEN + payload.len());
    buf[IPV6_HEADER_LEN..].copy_from_slice(payload);

    if let Some(mut ip6) = MutableIpv6Packet::new(&mut buf) {
        ip6.set_version(6);
        ip6.set_payload_length(payload.len().min(usize::from(u16::MAX)) as u16);
        ip6.set_next_header(IpNextHeaderProtocols::Udp);
        ip6.set_hop_limit(64);
        ip6.set_source(src);
        ip6.set_destination(dst);
    }

    let mut p = Packet::ip(buf.freeze());
    p.anno_mut().dst_ip6 = Some(dst);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_header_fields() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let p = ipv4(src, dst, b"hello");

        let ip = p.ipv4_header().unwrap();
        assert_eq!(ip.get_source(), src);
        assert_eq!(ip.get_destination(), dst);
        assert_eq!(ip.get_total_length(), 25);
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));
        assert_eq!(p.anno().dst_ip, Some(dst));
    }

    #[test]
    fn ipv6_header_fields() {
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let p = ipv6(Ipv6Addr::LOCALHOST, dst, &[0; 8]);
        assert_eq!(p.len(), 48);
        assert_eq!(p.ipv6_header().unwrap().get_destination(), dst);
        assert_eq!(p.anno().dst_ip6, Some(dst));
    }
}
