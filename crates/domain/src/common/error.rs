use thiserror::Error;

use crate::dns::error::DnsError;
use crate::filter::error::FilterError;
use crate::packet::error::PacketError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<FilterError> for DomainError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::DuplicateRule { id } => Self::DuplicateRule(id),
            other => Self::InvalidRule(other.to_string()),
        }
    }
}

impl From<DnsError> for DomainError {
    fn from(err: DnsError) -> Self {
        Self::EngineError(err.to_string())
    }
}

impl From<PacketError> for DomainError {
    fn from(err: PacketError) -> Self {
        Self::EngineError(err.to_string())
    }
}
