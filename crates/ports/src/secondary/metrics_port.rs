// Counter-recording seam between the packet pipeline and the metrics
// registry. All methods take `&self`: implementations use atomics.
//
// Default implementations are no-ops so test doubles implement only
// what the test asserts on.

/// User-space data-plane counters: received, allowed, blocked,
/// logged, dropped, parse_errors.
pub trait MetricsPort: Send + Sync {
    /// A DNS message was successfully parsed.
    fn record_received(&self) {}

    /// A query classified as Allow.
    fn record_allowed(&self) {}

    /// A query classified as Block.
    fn record_blocked(&self) {}

    /// A query classified as Log.
    fn record_logged(&self) {}

    /// A frame was dropped before parsing (channel full, TX unavailable).
    fn record_dropped(&self) {}

    /// A DNS payload failed to parse.
    fn record_parse_error(&self) {}

    /// Kernel-side counters read from the steering program's per-CPU
    /// map: (total, dns, redirected, blocked, passed).
    fn set_kernel_counters(&self, _total: u64, _dns: u64, _redirected: u64, _blocked: u64, _passed: u64) {
    }
}

/// No-op implementation for tests and disabled-metrics runs.
pub struct NullMetrics;

impl MetricsPort for NullMetrics {}
