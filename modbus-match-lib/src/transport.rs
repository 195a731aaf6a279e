//! Locate the TCP or UDP payload inside a raw IP packet.
//!
//! This is the boundary the host filtering framework normally provides. It only understands
//! plain IPv4 (with options) and IPv6 without extension headers; anything else is reported as
//! unsupported so the caller can treat it as a non-match.

use tracing::trace;

use crate::evaluator::match_payload;
use crate::rule::CompiledRule;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

/// IPv4 fragment offset mask (host order)
const IP_OFFSET: u16 = 0x1fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// Where the application payload starts and ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPayload {
    pub protocol: TransportProtocol,
    /// Offset right after the transport header
    pub offset: usize,
    /// End of the IP datagram; bytes past it (link-layer padding) are not payload
    pub end: usize,
}

impl TransportPayload {
    /// The datagram without trailing bytes past the IP length.
    pub fn datagram<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        packet.get(..self.end).unwrap_or(packet)
    }
}

/// Find the transport header end of an IPv4 or IPv6 packet.
///
/// The datagram is bounded by the IPv4 total length or the IPv6 payload length, whichever
/// the buffer can hold. Returns `None` for other IP versions, non-TCP/UDP protocols,
/// non-first IPv4 fragments and truncated headers.
pub fn locate_payload(packet: &[u8]) -> Option<TransportPayload> {
    let &version_byte = packet.first()?;
    let (protocol, l4_offset, end) = match version_byte >> 4 {
        4 => ipv4_transport(packet)?,
        6 => ipv6_transport(packet)?,
        version => {
            trace!(version, "unsupported IP version");
            return None;
        }
    };

    let protocol = match protocol {
        IPPROTO_TCP => TransportProtocol::Tcp,
        IPPROTO_UDP => TransportProtocol::Udp,
        other => {
            trace!(protocol = other, "not a TCP or UDP packet");
            return None;
        }
    };

    let l4 = packet.get(l4_offset..end)?;
    let header_len = match protocol {
        TransportProtocol::Tcp => {
            if l4.len() < TCP_MIN_HEADER {
                return None;
            }
            // data offset: upper nibble of byte 12, in 32-bit words
            let doff = usize::from(l4[12] >> 4) * 4;
            if doff < TCP_MIN_HEADER || doff > l4.len() {
                return None;
            }
            doff
        }
        TransportProtocol::Udp => {
            if l4.len() < UDP_HEADER {
                return None;
            }
            UDP_HEADER
        }
    };

    Some(TransportPayload { protocol, offset: l4_offset + header_len, end })
}

/// `(protocol, header length, datagram end)`
fn ipv4_transport(packet: &[u8]) -> Option<(u8, usize, usize)> {
    let header = packet.get(..IPV4_MIN_HEADER)?;
    let ihl = usize::from(header[0] & 0x0f) * 4;
    let total_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if total_len < ihl {
        trace!(total_len, ihl, "IPv4 total length shorter than its header");
        return None;
    }
    let end = total_len.min(packet.len());
    if ihl < IPV4_MIN_HEADER || ihl > end {
        return None;
    }
    let frag_off = u16::from_be_bytes([header[6], header[7]]);
    if frag_off & IP_OFFSET != 0 {
        trace!("non-first IPv4 fragment carries no transport header");
        return None;
    }
    Some((header[9], ihl, end))
}

fn ipv6_transport(packet: &[u8]) -> Option<(u8, usize, usize)> {
    let header = packet.get(..IPV6_HEADER)?;
    let payload_len = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let end = (IPV6_HEADER + payload_len).min(packet.len());
    Some((header[6], IPV6_HEADER, end))
}

/// Locate the payload of a raw IP packet and match it against `rule`.
///
/// Unsupported or truncated packets do not match.
pub fn match_ip_packet(packet: &[u8], rule: &CompiledRule) -> bool {
    match locate_payload(packet) {
        Some(payload) => match_payload(payload.datagram(packet), payload.offset, rule),
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[rustfmt::skip]
    pub(crate) const MODBUS_READ: [u8; 12] = [
        0x00, 0x2a, 0x00, 0x00, 0x00, 0x06, // id=42 proto=0 len=6
        0x01, 0x03,                         // unit=1 fc=3
        0x00, 0x64, 0x00, 0x02,             // start=100 count=2
    ];

    pub(crate) fn ipv4_tcp(payload: &[u8], tcp_options: usize) -> Vec<u8> {
        let mut pkt = vec![0u8; 20];
        pkt[0] = 0x45;
        pkt[9] = IPPROTO_TCP;
        let mut tcp = vec![0u8; 20 + tcp_options];
        tcp[12] = (((20 + tcp_options) / 4) as u8) << 4;
        pkt.extend_from_slice(&tcp);
        pkt.extend_from_slice(payload);
        set_ipv4_total_len(&mut pkt);
        pkt
    }

    fn set_ipv4_total_len(pkt: &mut [u8]) {
        let total = pkt.len() as u16;
        pkt[2..4].copy_from_slice(&total.to_be_bytes());
    }

    pub(crate) fn ipv4_udp(payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 28];
        pkt[0] = 0x45;
        pkt[9] = IPPROTO_UDP;
        pkt.extend_from_slice(payload);
        set_ipv4_total_len(&mut pkt);
        pkt
    }

    fn ipv6_udp(payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 40];
        pkt[0] = 0x60;
        pkt[6] = IPPROTO_UDP;
        pkt.extend_from_slice(&[0u8; 8]);
        pkt.extend_from_slice(payload);
        let payload_len = (pkt.len() - 40) as u16;
        pkt[4..6].copy_from_slice(&payload_len.to_be_bytes());
        pkt
    }

    #[test]
    fn test_ipv4_tcp_with_options() {
        let pkt = ipv4_tcp(&MODBUS_READ, 12);
        assert_eq!(
            locate_payload(&pkt),
            Some(TransportPayload { protocol: TransportProtocol::Tcp, offset: 52, end: 64 })
        );
    }

    #[test]
    fn test_ipv4_with_ip_options() {
        let mut pkt = ipv4_tcp(&MODBUS_READ, 0);
        pkt[0] = 0x46;
        pkt.splice(20..20, [1u8, 1, 1, 0]);
        set_ipv4_total_len(&mut pkt);
        assert_eq!(locate_payload(&pkt).map(|p| p.offset), Some(44));
    }

    #[test]
    fn test_ipv6_udp() {
        let pkt = ipv6_udp(&MODBUS_READ);
        assert_eq!(
            locate_payload(&pkt),
            Some(TransportPayload { protocol: TransportProtocol::Udp, offset: 48, end: 60 })
        );
    }

    #[test]
    fn test_unsupported_protocol() {
        let mut pkt = ipv4_tcp(&MODBUS_READ, 0);
        pkt[9] = 1; // ICMP
        assert_eq!(locate_payload(&pkt), None);
    }

    #[test]
    fn test_non_first_fragment() {
        let mut pkt = ipv4_tcp(&MODBUS_READ, 0);
        pkt[7] = 0x10;
        assert_eq!(locate_payload(&pkt), None);
    }

    #[test]
    fn test_truncated_headers() {
        let pkt = ipv4_tcp(&MODBUS_READ, 0);
        assert_eq!(locate_payload(&pkt[..30]), None);
        assert_eq!(locate_payload(&pkt[..10]), None);
        assert_eq!(locate_payload(&[]), None);
        assert_eq!(locate_payload(&[0x20, 0, 0]), None);
    }

    #[test]
    fn test_bogus_tcp_data_offset() {
        let mut pkt = ipv4_tcp(&MODBUS_READ, 0);
        pkt[32] = 0x40; // 16 bytes, below the minimum
        assert_eq!(locate_payload(&pkt), None);
        pkt[32] = 0xf0; // 60 bytes, past the end
        assert_eq!(locate_payload(&pkt), None);
    }

    #[test]
    fn test_link_padding_is_not_payload() -> Result<(), crate::error::RuleError> {
        // empty UDP datagram followed by Ethernet minimum-frame padding
        let mut pkt = ipv4_udp(&[]);
        pkt.extend_from_slice(&[0u8; 18]);
        assert_eq!(
            locate_payload(&pkt),
            Some(TransportPayload { protocol: TransportProtocol::Udp, offset: 28, end: 28 })
        );
        let rule = CompiledRule::parse("--prot 0 --fc 0")?;
        assert!(!match_ip_packet(&pkt, &rule));
        assert!(!match_ip_packet(&pkt, &CompiledRule::any()));

        let mut pkt = ipv6_udp(&[]);
        pkt.extend_from_slice(&[0u8; 18]);
        assert_eq!(locate_payload(&pkt).map(|p| p.end), Some(48));
        assert!(!match_ip_packet(&pkt, &CompiledRule::any()));

        // padding after a real envelope is ignored as well
        let mut pkt = ipv4_udp(&MODBUS_READ[..8]);
        pkt.extend_from_slice(&[0x00, 0x64, 0x00, 0x02]);
        assert!(match_ip_packet(&pkt, &CompiledRule::parse("--fc 3")?));
        assert!(!match_ip_packet(&pkt, &CompiledRule::parse("--reg 0:65535")?));
        Ok(())
    }

    #[test]
    fn test_ipv4_total_length_bounds() {
        let mut pkt = ipv4_tcp(&MODBUS_READ, 0);
        pkt[2..4].copy_from_slice(&19u16.to_be_bytes());
        assert_eq!(locate_payload(&pkt), None);

        // header fits, TCP header cut off by the total length
        pkt[2..4].copy_from_slice(&30u16.to_be_bytes());
        assert_eq!(locate_payload(&pkt), None);

        // total length past the buffer: bounded by what was captured
        pkt[2..4].copy_from_slice(&1500u16.to_be_bytes());
        assert_eq!(locate_payload(&pkt).map(|p| p.end), Some(pkt.len()));
    }

    #[test]
    fn test_match_ip_packet() -> Result<(), crate::error::RuleError> {
        let rule = CompiledRule::parse("--fc 3 --reg 101:200")?;
        assert!(match_ip_packet(&ipv4_tcp(&MODBUS_READ, 0), &rule));
        assert!(match_ip_packet(&ipv6_udp(&MODBUS_READ), &rule));
        assert!(!match_ip_packet(&ipv4_tcp(&MODBUS_READ[..7], 0), &CompiledRule::any()));
        Ok(())
    }
}
