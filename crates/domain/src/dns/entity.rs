// ── Wire constants ──────────────────────────────────────────────────

/// DNS header is always 12 bytes.
pub const DNS_HEADER_LEN: usize = 12;
/// Maximum label length per RFC 1035.
pub const MAX_LABEL_LEN: usize = 63;
/// Maximum domain name length per RFC 1035.
pub const MAX_DOMAIN_LEN: usize = 253;

/// QR bit of the flags word: 0 = query, 1 = response.
pub const FLAG_QR: u16 = 1 << 15;
/// AA (authoritative answer) bit.
pub const FLAG_AA: u16 = 1 << 10;
/// RD (recursion desired) bit.
pub const FLAG_RD: u16 = 1 << 8;
/// RA (recursion available) bit.
pub const FLAG_RA: u16 = 1 << 7;

/// RCODE 3: the queried name does not exist.
pub const RCODE_NXDOMAIN: u16 = 3;
/// RCODE 5: the server refuses to answer.
pub const RCODE_REFUSED: u16 = 5;

// ── Query types ─────────────────────────────────────────────────────

/// Well-known DNS record type codes used by rule configuration and logs.
///
/// Unknown codes are carried through as raw u16 — the engine filters on
/// wire codes, not on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Any,
    Other(u16),
}

impl RecordType {
    pub fn from_wire(code: u16) -> Self {
        match code {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            255 => Self::Any,
            other => Self::Other(other),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Ptr => 12,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Any => 255,
            Self::Other(code) => code,
        }
    }

    /// Parse a configuration name like `"A"`, `"AAAA"`, `"ANY"`.
    /// Case-insensitive. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        let code = match name.to_ascii_uppercase().as_str() {
            "A" => Self::A,
            "NS" => Self::Ns,
            "CNAME" => Self::Cname,
            "SOA" => Self::Soa,
            "PTR" => Self::Ptr,
            "MX" => Self::Mx,
            "TXT" => Self::Txt,
            "AAAA" => Self::Aaaa,
            "SRV" => Self::Srv,
            "ANY" => Self::Any,
            _ => return None,
        };
        Some(code)
    }

    /// Display name for logs. Unknown codes render as `TYPE<code>`.
    pub fn name(self) -> std::borrow::Cow<'static, str> {
        match self {
            Self::A => "A".into(),
            Self::Ns => "NS".into(),
            Self::Cname => "CNAME".into(),
            Self::Soa => "SOA".into(),
            Self::Ptr => "PTR".into(),
            Self::Mx => "MX".into(),
            Self::Txt => "TXT".into(),
            Self::Aaaa => "AAAA".into(),
            Self::Srv => "SRV".into(),
            Self::Any => "ANY".into(),
            Self::Other(code) => format!("TYPE{code}").into(),
        }
    }
}

// ── Parsed message ──────────────────────────────────────────────────

/// First question of a DNS message. `name` is ASCII-lowercased labels
/// joined by `.` and borrows the parser's scratch buffer.
#[derive(Debug)]
pub struct Question<'a> {
    pub name: &'a str,
    pub qtype: u16,
    pub qclass: u16,
}

/// A parsed DNS query message.
///
/// `raw` borrows the original UDP payload so a response can be
/// synthesized from it without copying.
#[derive(Debug)]
pub struct DnsMessage<'a> {
    pub id: u16,
    pub flags: u16,
    pub question: Question<'a>,
    pub raw: &'a [u8],
}

impl DnsMessage<'_> {
    /// `true` when the QR bit is clear (this is a query).
    pub fn is_query(&self) -> bool {
        self.flags & FLAG_QR == 0
    }

    pub fn qtype(&self) -> RecordType {
        RecordType::from_wire(self.question.qtype)
    }
}
