use std::time::Duration;

/// Default config file location, overridable with `--config`.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Receive-loop poll timeout; also the cancellation-observation bound.
pub const POLL_TIMEOUT_MS: i32 = 100;

/// Default RX batch size per receive-loop iteration.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Worker channel capacity is `num_workers × this`.
pub const WORKER_CHANNEL_FACTOR: usize = 1024;

/// How often kernel-side counters are folded into the registry.
pub const KERNEL_METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on waiting for spawned servers during shutdown.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum rules accepted from a rules file.
pub const MAX_RULES: usize = 50_000;
