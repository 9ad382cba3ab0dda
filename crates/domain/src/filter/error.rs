use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid rule id: {reason}")]
    InvalidRuleId { reason: String },

    #[error("duplicate rule: {id}")]
    DuplicateRule { id: String },

    #[error("rule '{id}' has no domain patterns")]
    EmptyDomains { id: String },

    #[error("invalid domain pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
