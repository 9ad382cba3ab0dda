use crate::dns::entity::{
    DNS_HEADER_LEN, FLAG_AA, FLAG_QR, FLAG_RA, FLAG_RD, RCODE_NXDOMAIN, RCODE_REFUSED,
};

use super::error::PacketError;
use super::{ETH_HDR_LEN, ETHERTYPE_IPV4, ETHERTYPE_IPV6, IPV6_HDR_LEN, UDP_HDR_LEN};

/// Build a complete response datagram into `out` from the original
/// frame and a DNS response payload, in place. Returns the total frame
/// length written.
///
/// - Ethernet: MACs swapped, EtherType preserved.
/// - IPv4: addresses swapped, total-length rewritten, header checksum
///   recomputed. UDP checksum left zero (optional for IPv4).
/// - IPv6: addresses swapped, payload-length rewritten, UDP checksum
///   computed over the pseudo-header (mandatory), with the 0xFFFF
///   substitution when the computed sum is zero.
/// - UDP: ports swapped, length rewritten.
pub fn build_response(
    orig: &[u8],
    dns_payload: &[u8],
    out: &mut [u8],
) -> Result<usize, PacketError> {
    if orig.len() < ETH_HDR_LEN + UDP_HDR_LEN {
        return Err(PacketError::PacketTooShort {
            need: ETH_HDR_LEN + UDP_HDR_LEN,
            got: orig.len(),
        });
    }

    let ethertype = u16::from_be_bytes([orig[12], orig[13]]);
    let ip_hdr_len = match ethertype {
        ETHERTYPE_IPV4 => ((orig[ETH_HDR_LEN] & 0x0F) as usize) * 4,
        ETHERTYPE_IPV6 => IPV6_HDR_LEN,
        other => return Err(PacketError::UnsupportedEtherType(other)),
    };

    let udp_start = ETH_HDR_LEN + ip_hdr_len;
    if orig.len() < udp_start + UDP_HDR_LEN {
        return Err(PacketError::PacketTooShort {
            need: udp_start + UDP_HDR_LEN,
            got: orig.len(),
        });
    }

    let total_len = udp_start + UDP_HDR_LEN + dns_payload.len();
    if out.len() < total_len {
        return Err(PacketError::BufferTooSmall {
            need: total_len,
            have: out.len(),
        });
    }

    // Ethernet: swap MACs, keep EtherType.
    out[0..6].copy_from_slice(&orig[6..12]);
    out[6..12].copy_from_slice(&orig[0..6]);
    out[12..14].copy_from_slice(&orig[12..14]);

    let ip = ETH_HDR_LEN;
    let udp_len = UDP_HDR_LEN + dns_payload.len();

    if ethertype == ETHERTYPE_IPV4 {
        out[ip..ip + ip_hdr_len].copy_from_slice(&orig[ip..ip + ip_hdr_len]);

        // Swap source/destination addresses.
        out[ip + 12..ip + 16].copy_from_slice(&orig[ip + 16..ip + 20]);
        out[ip + 16..ip + 20].copy_from_slice(&orig[ip + 12..ip + 16]);

        let ip_total = (ip_hdr_len + udp_len) as u16;
        out[ip + 2..ip + 4].copy_from_slice(&ip_total.to_be_bytes());

        out[ip + 10..ip + 12].copy_from_slice(&[0, 0]);
        let checksum = ipv4_header_checksum(&out[ip..ip + ip_hdr_len]);
        out[ip + 10..ip + 12].copy_from_slice(&checksum.to_be_bytes());
    } else {
        out[ip..ip + IPV6_HDR_LEN].copy_from_slice(&orig[ip..ip + IPV6_HDR_LEN]);

        out[ip + 8..ip + 24].copy_from_slice(&orig[ip + 24..ip + 40]);
        out[ip + 24..ip + 40].copy_from_slice(&orig[ip + 8..ip + 24]);

        out[ip + 4..ip + 6].copy_from_slice(&(udp_len as u16).to_be_bytes());
    }

    // UDP: swap ports, rewrite length, zero checksum for now.
    out[udp_start..udp_start + 2].copy_from_slice(&orig[udp_start + 2..udp_start + 4]);
    out[udp_start + 2..udp_start + 4].copy_from_slice(&orig[udp_start..udp_start + 2]);
    out[udp_start + 4..udp_start + 6].copy_from_slice(&(udp_len as u16).to_be_bytes());
    out[udp_start + 6..udp_start + 8].copy_from_slice(&[0, 0]);

    out[udp_start + UDP_HDR_LEN..total_len].copy_from_slice(dns_payload);

    // IPv6 requires a valid UDP checksum over the pseudo-header.
    if ethertype == ETHERTYPE_IPV6 {
        let checksum = udp_checksum_v6(&out[..total_len], ip, udp_start, udp_len);
        out[udp_start + 6..udp_start + 8].copy_from_slice(&checksum.to_be_bytes());
    }

    Ok(total_len)
}

/// Rewrite a DNS query into a block response in `out`:
/// QR/AA/RA set, RD preserved, RCODE 3 (NXDOMAIN) or 5 (REFUSED),
/// QDCOUNT forced to 1, all other section counts zeroed. The question
/// bytes are carried over verbatim.
pub fn build_block_response(
    query_raw: &[u8],
    nxdomain: bool,
    out: &mut Vec<u8>,
) -> Result<(), PacketError> {
    if query_raw.len() < DNS_HEADER_LEN {
        return Err(PacketError::PacketTooShort {
            need: DNS_HEADER_LEN,
            got: query_raw.len(),
        });
    }

    out.clear();
    out.extend_from_slice(query_raw);

    let orig_flags = u16::from_be_bytes([query_raw[2], query_raw[3]]);
    let rcode = if nxdomain { RCODE_NXDOMAIN } else { RCODE_REFUSED };
    let flags = FLAG_QR | FLAG_AA | FLAG_RA | (orig_flags & FLAG_RD) | rcode;
    out[2..4].copy_from_slice(&flags.to_be_bytes());

    out[4..6].copy_from_slice(&1u16.to_be_bytes()); // qdcount
    out[6..8].copy_from_slice(&[0, 0]); // ancount
    out[8..10].copy_from_slice(&[0, 0]); // nscount
    out[10..12].copy_from_slice(&[0, 0]); // arcount

    Ok(())
}

// ── Checksums ───────────────────────────────────────────────────────

/// RFC 791 one's-complement header checksum. The checksum field must
/// already be zeroed.
fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut i = 0;
    while i < header.len() {
        let word = if i + 1 < header.len() {
            u32::from(header[i]) << 8 | u32::from(header[i + 1])
        } else {
            u32::from(header[i]) << 8
        };
        sum += word;
        i += 2;
    }
    fold(sum)
}

/// RFC 2460 UDP checksum: IPv6 pseudo-header (src, dst, 32-bit UDP
/// length, 32-bit next-header=17) plus UDP header and data, skipping
/// the checksum field itself. Zero results become 0xFFFF on the wire.
fn udp_checksum_v6(packet: &[u8], ip_start: usize, udp_start: usize, udp_len: usize) -> u16 {
    let mut sum = 0u32;

    // Pseudo-header: the two 16-byte addresses.
    let mut i = ip_start + 8;
    while i < ip_start + 40 {
        sum += u32::from(packet[i]) << 8 | u32::from(packet[i + 1]);
        i += 2;
    }
    sum += udp_len as u32;
    sum += u32::from(super::IPPROTO_UDP);

    // UDP header and payload, checksum field skipped.
    let udp_end = udp_start + udp_len;
    let mut i = udp_start;
    while i < udp_end {
        if i == udp_start + 6 {
            i += 2;
            continue;
        }
        let word = if i + 1 < udp_end {
            u32::from(packet[i]) << 8 | u32::from(packet[i + 1])
        } else {
            u32::from(packet[i]) << 8
        };
        sum += word;
        i += 2;
    }

    let checksum = fold(sum);
    if checksum == 0 { 0xFFFF } else { checksum }
}

fn fold(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !(sum as u16)
}

// ── Test fixtures ───────────────────────────────────────────────────
