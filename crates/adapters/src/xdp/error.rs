use thiserror::Error;

#[derive(Debug, Error)]
pub enum XdpError {
    #[error("interface '{interface}' not found")]
    InterfaceMissing { interface: String },

    #[error("queue {queue_id} unavailable: {source}")]
    QueueUnavailable {
        queue_id: u32,
        source: std::io::Error,
    },

    #[error("resource limit creating {what}: {source} (try raising RLIMIT_MEMLOCK)")]
    ResourceLimit {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("{what} failed: {source}")]
    Syscall {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
