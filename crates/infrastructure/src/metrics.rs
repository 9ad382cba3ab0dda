use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use ports::secondary::metrics_port::MetricsPort;

/// Prometheus registry wrapping the data-plane counters.
///
/// The six user-space counters are updated from worker and receive-loop
/// threads via `MetricsPort`; all recording is lock-free (relaxed
/// atomics inside `prometheus-client`). The five kernel gauges are
/// refreshed periodically from the steering program's per-CPU map.
/// Wrap in `Arc` for sharing; the registry itself is not `Clone`.
pub struct AgentMetrics {
    registry: Registry,
    pub received: Counter,
    pub allowed: Counter,
    pub blocked: Counter,
    pub logged: Counter,
    pub dropped: Counter,
    pub parse_errors: Counter,
    pub kernel_total: Gauge,
    pub kernel_dns: Gauge,
    pub kernel_redirected: Gauge,
    pub kernel_blocked: Gauge,
    pub kernel_passed: Gauge,
}

/// Point-in-time copy of every counter, for the shutdown stats line
/// and for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub logged: u64,
    pub dropped: u64,
    pub parse_errors: u64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("dnsguard");

        let received = Counter::default();
        registry.register(
            "queries_received",
            "DNS messages successfully parsed",
            received.clone(),
        );

        let allowed = Counter::default();
        registry.register("queries_allowed", "Queries classified Allow", allowed.clone());

        let blocked = Counter::default();
        registry.register("queries_blocked", "Queries classified Block", blocked.clone());

        let logged = Counter::default();
        registry.register("queries_logged", "Queries classified Log", logged.clone());

        let dropped = Counter::default();
        registry.register(
            "frames_dropped",
            "Frames dropped before classification (backpressure, TX exhaustion)",
            dropped.clone(),
        );

        let parse_errors = Counter::default();
        registry.register(
            "parse_errors",
            "DNS payloads that failed to parse",
            parse_errors.clone(),
        );

        let kernel_total = Gauge::default();
        registry.register(
            "kernel_packets_total",
            "Packets seen by the steering program",
            kernel_total.clone(),
        );
        let kernel_dns = Gauge::default();
        registry.register(
            "kernel_packets_dns",
            "Packets the steering program classified as DNS",
            kernel_dns.clone(),
        );
        let kernel_redirected = Gauge::default();
        registry.register(
            "kernel_packets_redirected",
            "Packets redirected into queue sockets",
            kernel_redirected.clone(),
        );
        let kernel_blocked = Gauge::default();
        registry.register(
            "kernel_packets_blocked",
            "Packets dropped in kernel",
            kernel_blocked.clone(),
        );
        let kernel_passed = Gauge::default();
        registry.register(
            "kernel_packets_passed",
            "Packets passed to the normal stack",
            kernel_passed.clone(),
        );

        Self {
            registry,
            received,
            allowed,
            blocked,
            logged,
            dropped,
            parse_errors,
            kernel_total,
            kernel_dns,
            kernel_redirected,
            kernel_blocked,
            kernel_passed,
        }
    }

    /// Encode the registry in OpenMetrics text format.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        // Encoding into a String cannot fail.
        let _ = encode(&mut out, &self.registry);
        out
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.get(),
            allowed: self.allowed.get(),
            blocked: self.blocked.get(),
            logged: self.logged.get(),
            dropped: self.dropped.get(),
            parse_errors: self.parse_errors.get(),
        }
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPort for AgentMetrics {
    fn record_received(&self) {
        self.received.inc();
    }

    fn record_allowed(&self) {
        self.allowed.inc();
    }

    fn record_blocked(&self) {
        self.blocked.inc();
    }

    fn record_logged(&self) {
        self.logged.inc();
    }

    fn record_dropped(&self) {
        self.dropped.inc();
    }

    fn record_parse_error(&self) {
        self.parse_errors.inc();
    }

    fn set_kernel_counters(&self, total: u64, dns: u64, redirected: u64, blocked: u64, passed: u64) {
        self.kernel_total.set(total as i64);
        self.kernel_dns.set(dns as i64);
        self.kernel_redirected.set(redirected as i64);
        self.kernel_blocked.set(blocked as i64);
        self.kernel_passed.set(passed as i64);
    }
}
