use super::entity::{DNS_HEADER_LEN, DnsMessage, MAX_DOMAIN_LEN, MAX_LABEL_LEN, Question};
use super::error::DnsError;

/// Streaming DNS query parser with a reusable name buffer.
///
/// Only the header and the first question are decoded — that is all the
/// rule engine needs, and queries carry exactly one question in practice.
/// Compression pointers are rejected: legitimate queries never compress
/// the question name, and rejecting them keeps the parser single-pass.
///
/// The parser is `!Sync` by design: each worker owns one, so the name
/// buffer is reused across packets without allocation.
pub struct QueryParser {
    name_buf: String,
}

impl QueryParser {
    pub fn new() -> Self {
        Self {
            // Worst case is 253 bytes of name; reserve once up front.
            name_buf: String::with_capacity(MAX_DOMAIN_LEN + 1),
        }
    }

    /// Parse the DNS payload of a UDP datagram.
    ///
    /// The returned message borrows both `payload` (for `raw`) and the
    /// parser's scratch buffer (for the question name), so it must be
    /// consumed before the next `parse` call.
    pub fn parse<'a>(&'a mut self, payload: &'a [u8]) -> Result<DnsMessage<'a>, DnsError> {
        if payload.len() < DNS_HEADER_LEN {
            return Err(DnsError::TruncatedPayload {
                need: DNS_HEADER_LEN,
                got: payload.len(),
            });
        }

        let id = u16::from_be_bytes([payload[0], payload[1]]);
        let flags = u16::from_be_bytes([payload[2], payload[3]]);
        let qdcount = u16::from_be_bytes([payload[4], payload[5]]);

        if qdcount == 0 {
            return Err(DnsError::MalformedHeader("zero question count"));
        }

        let offset = self.decode_qname(payload, DNS_HEADER_LEN)?;

        // qtype (2) + qclass (2)
        if offset + 4 > payload.len() {
            return Err(DnsError::TruncatedPayload {
                need: offset + 4,
                got: payload.len(),
            });
        }
        let qtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        let qclass = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]);

        Ok(DnsMessage {
            id,
            flags,
            question: Question {
                name: &self.name_buf,
                qtype,
                qclass,
            },
            raw: payload,
        })
    }

    /// Decode the QNAME at `start` into the scratch buffer, lowercasing
    /// as it goes. Returns the offset just past the terminating zero
    /// label.
    fn decode_qname(&mut self, payload: &[u8], start: usize) -> Result<usize, DnsError> {
        self.name_buf.clear();
        let mut offset = start;
        let mut total_len = 0usize;

        loop {
            if offset >= payload.len() {
                return Err(DnsError::TruncatedPayload {
                    need: offset + 1,
                    got: payload.len(),
                });
            }

            let label_byte = payload[offset];

            // Null label terminates the name
            if label_byte == 0 {
                return Ok(offset + 1);
            }

            // Top two bits set = compression pointer (RFC 1035 §4.1.4)
            if label_byte & 0xC0 == 0xC0 {
                return Err(DnsError::CompressedName);
            }

            let label_len = label_byte as usize;
            if label_len > MAX_LABEL_LEN {
                return Err(DnsError::LabelTooLong { length: label_len });
            }
            if offset + 1 + label_len > payload.len() {
                return Err(DnsError::TruncatedPayload {
                    need: offset + 1 + label_len,
                    got: payload.len(),
                });
            }

            total_len += label_len;
            if !self.name_buf.is_empty() {
                total_len += 1; // dot separator
                self.name_buf.push('.');
            }
            if total_len > MAX_DOMAIN_LEN {
                return Err(DnsError::DomainTooLong { length: total_len });
            }

            for &b in &payload[offset + 1..offset + 1 + label_len] {
                self.name_buf.push(b.to_ascii_lowercase() as char);
            }
            offset += 1 + label_len;
        }
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}
