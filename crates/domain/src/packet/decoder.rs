use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Range;

use super::error::PacketError;
use super::{
    ETH_HDR_LEN, ETHERTYPE_IPV4, ETHERTYPE_IPV6, IPPROTO_UDP, IPV4_MIN_HDR_LEN, IPV6_HDR_LEN,
    UDP_HDR_LEN,
};

/// L2–L4 addressing of a received datagram, as needed by the rule
/// engine (source IP) and the reflector (everything else).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub is_ipv6: bool,
}

/// Decoded frame: addressing plus the UDP payload byte range within
/// the original frame.
#[derive(Debug)]
pub struct DecodedPacket {
    pub info: PacketInfo,
    pub payload: Range<usize>,
}

/// Decode an Ethernet frame down to its UDP payload.
///
/// IPv6 extension headers are not followed: if next-header is not UDP
/// the packet is rejected. The payload range is
/// `[l4 + 8, l4 + udp_length)` clamped to the frame end.
pub fn decode_udp(frame: &[u8]) -> Result<DecodedPacket, PacketError> {
    if frame.len() < ETH_HDR_LEN {
        return Err(PacketError::PacketTooShort {
            need: ETH_HDR_LEN,
            got: frame.len(),
        });
    }

    let mut dst_mac = [0u8; 6];
    let mut src_mac = [0u8; 6];
    dst_mac.copy_from_slice(&frame[0..6]);
    src_mac.copy_from_slice(&frame[6..12]);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

    let (src_ip, dst_ip, is_ipv6, l4_offset) = match ethertype {
        ETHERTYPE_IPV4 => {
            if frame.len() < ETH_HDR_LEN + IPV4_MIN_HDR_LEN {
                return Err(PacketError::PacketTooShort {
                    need: ETH_HDR_LEN + IPV4_MIN_HDR_LEN,
                    got: frame.len(),
                });
            }
            let ihl = ((frame[ETH_HDR_LEN] & 0x0F) as usize) * 4;
            if ihl < IPV4_MIN_HDR_LEN || frame.len() < ETH_HDR_LEN + ihl {
                return Err(PacketError::PacketTooShort {
                    need: ETH_HDR_LEN + ihl.max(IPV4_MIN_HDR_LEN),
                    got: frame.len(),
                });
            }
            if frame[ETH_HDR_LEN + 9] != IPPROTO_UDP {
                return Err(PacketError::NotUdp);
            }
            let src = Ipv4Addr::new(
                frame[ETH_HDR_LEN + 12],
                frame[ETH_HDR_LEN + 13],
                frame[ETH_HDR_LEN + 14],
                frame[ETH_HDR_LEN + 15],
            );
            let dst = Ipv4Addr::new(
                frame[ETH_HDR_LEN + 16],
                frame[ETH_HDR_LEN + 17],
                frame[ETH_HDR_LEN + 18],
                frame[ETH_HDR_LEN + 19],
            );
            (IpAddr::V4(src), IpAddr::V4(dst), false, ETH_HDR_LEN + ihl)
        }
        ETHERTYPE_IPV6 => {
            if frame.len() < ETH_HDR_LEN + IPV6_HDR_LEN {
                return Err(PacketError::PacketTooShort {
                    need: ETH_HDR_LEN + IPV6_HDR_LEN,
                    got: frame.len(),
                });
            }
            if frame[ETH_HDR_LEN + 6] != IPPROTO_UDP {
                return Err(PacketError::NotUdp);
            }
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&frame[ETH_HDR_LEN + 8..ETH_HDR_LEN + 24]);
            dst.copy_from_slice(&frame[ETH_HDR_LEN + 24..ETH_HDR_LEN + 40]);
            (
                IpAddr::V6(Ipv6Addr::from(src)),
                IpAddr::V6(Ipv6Addr::from(dst)),
                true,
                ETH_HDR_LEN + IPV6_HDR_LEN,
            )
        }
        other => return Err(PacketError::UnsupportedEtherType(other)),
    };

    if frame.len() < l4_offset + UDP_HDR_LEN {
        return Err(PacketError::PacketTooShort {
            need: l4_offset + UDP_HDR_LEN,
            got: frame.len(),
        });
    }

    let src_port = u16::from_be_bytes([frame[l4_offset], frame[l4_offset + 1]]);
    let dst_port = u16::from_be_bytes([frame[l4_offset + 2], frame[l4_offset + 3]]);
    let udp_len = u16::from_be_bytes([frame[l4_offset + 4], frame[l4_offset + 5]]) as usize;

    let payload_start = l4_offset + UDP_HDR_LEN;
    let payload_end = (l4_offset + udp_len).min(frame.len());
    if payload_end <= payload_start {
        return Err(PacketError::PacketTooShort {
            need: payload_start + 1,
            got: payload_end,
        });
    }

    Ok(DecodedPacket {
        info: PacketInfo {
            src_mac,
            dst_mac,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            is_ipv6,
        },
        payload: payload_start..payload_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::reflector::test_support::{build_ipv4_udp, build_ipv6_udp};

    #[test]
    fn decode_ipv4_udp() {
        let payload = b"\x12\x34rest-of-dns";
        let frame = build_ipv4_udp(
            [1, 2, 3, 4, 5, 6],
            [7, 8, 9, 10, 11, 12],
            [192, 168, 1, 10],
            [8, 8, 8, 8],
            40000,
            53,
            payload,
        );
        let decoded = decode_udp(&frame).unwrap();
        assert_eq!(decoded.info.src_mac, [1, 2, 3, 4, 5, 6]);
        assert_eq!(decoded.info.dst_mac, [7, 8, 9, 10, 11, 12]);
        assert_eq!(decoded.info.src_ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(decoded.info.dst_ip, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(decoded.info.src_port, 40000);
        assert_eq!(decoded.info.dst_port, 53);
        assert!(!decoded.info.is_ipv6);
        assert_eq!(&frame[decoded.payload], payload);
    }

    #[test]
    fn decode_ipv6_udp() {
        let src = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
        let frame = build_ipv6_udp(
            [1, 1, 1, 1, 1, 1],
            [2, 2, 2, 2, 2, 2],
            src,
            dst,
            1234,
            53,
            b"payload",
        );
        let decoded = decode_udp(&frame).unwrap();
        assert_eq!(decoded.info.src_ip, IpAddr::V6(src));
        assert_eq!(decoded.info.dst_ip, IpAddr::V6(dst));
        assert!(decoded.info.is_ipv6);
        assert_eq!(&frame[decoded.payload], b"payload");
    }

    #[test]
    fn payload_clamped_to_frame_end() {
        // UDP length claims more bytes than the frame carries.
        let mut frame = build_ipv4_udp(
            [0; 6],
            [0; 6],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            1000,
            53,
            b"abcd",
        );
        let l4 = ETH_HDR_LEN + IPV4_MIN_HDR_LEN;
        frame[l4 + 4..l4 + 6].copy_from_slice(&500u16.to_be_bytes());
        let decoded = decode_udp(&frame).unwrap();
        assert_eq!(&frame[decoded.payload], b"abcd");
    }

    #[test]
    fn non_udp_rejected() {
        let mut frame = build_ipv4_udp(
            [0; 6],
            [0; 6],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            1000,
            53,
            b"abcd",
        );
        frame[ETH_HDR_LEN + 9] = 6; // TCP
        assert_eq!(decode_udp(&frame).unwrap_err(), PacketError::NotUdp);
    }

    #[test]
    fn ipv6_extension_header_rejected() {
        let mut frame = build_ipv6_udp(
            [0; 6],
            [0; 6],
            Ipv6Addr::LOCALHOST,
            Ipv6Addr::LOCALHOST,
            1,
            53,
            b"abcd",
        );
        frame[ETH_HDR_LEN + 6] = 0; // hop-by-hop options
        assert_eq!(decode_udp(&frame).unwrap_err(), PacketError::NotUdp);
    }

    #[test]
    fn arp_rejected() {
        let mut frame = vec![0u8; 64];
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert_eq!(
            decode_udp(&frame).unwrap_err(),
            PacketError::UnsupportedEtherType(0x0806)
        );
    }

    #[test]
    fn runt_frames_rejected() {
        assert!(matches!(
            decode_udp(&[0u8; 10]).unwrap_err(),
            PacketError::PacketTooShort { .. }
        ));
        // Valid ethernet header, truncated IPv4 header.
        let mut frame = vec![0u8; 20];
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        assert!(matches!(
            decode_udp(&frame).unwrap_err(),
            PacketError::PacketTooShort { .. }
        ));
    }

    #[test]
    fn empty_udp_payload_rejected() {
        let frame = build_ipv4_udp(
            [0; 6],
            [0; 6],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            1000,
            53,
            b"",
        );
        assert!(matches!(
            decode_udp(&frame).unwrap_err(),
            PacketError::PacketTooShort { .. }
        ));
    }
}
