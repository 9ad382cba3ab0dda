use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("truncated payload: need {need} bytes, got {got}")]
    TruncatedPayload { need: usize, got: usize },

    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    #[error("label length {length} exceeds maximum 63")]
    LabelTooLong { length: usize },

    #[error("domain name length {length} exceeds maximum 253")]
    DomainTooLong { length: usize },

    #[error("compression pointer in query name")]
    CompressedName,
}
