//! Agent configuration: structs, parsing, and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid value '{value}' for field '{field}': expected one of {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Top-level config ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Interface the steering program attaches to.
    pub interface: String,

    /// Path to the compiled steering object; `--bpf` overrides it.
    #[serde(default)]
    pub bpf_path: String,

    #[serde(default = "default_rules_path")]
    pub rules_path: String,

    #[serde(default)]
    pub queue_start: u32,

    /// 0 = drive every RX queue the interface exposes.
    #[serde(default)]
    pub queue_count: u32,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub xdp: XdpConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub response: ResponseConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_rules_path() -> String {
    "configs/rules.yaml".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// UDP destination ports redirected as DNS. Empty means port 53.
    #[serde(default)]
    pub listen_ports: Vec<u16>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_ports: vec![53],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XdpConfig {
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
    #[serde(default = "default_ring_descs")]
    pub fill_ring_num_descs: u32,
    #[serde(default = "default_ring_descs")]
    pub completion_ring_num_descs: u32,
    #[serde(default = "default_ring_descs")]
    pub rx_ring_num_descs: u32,
    #[serde(default = "default_ring_descs")]
    pub tx_ring_num_descs: u32,
}

fn default_num_frames() -> u32 {
    4096
}
fn default_frame_size() -> u32 {
    2048
}
fn default_ring_descs() -> u32 {
    2048
}

impl Default for XdpConfig {
    fn default() -> Self {
        Self {
            num_frames: default_num_frames(),
            frame_size: default_frame_size(),
            fill_ring_num_descs: default_ring_descs(),
            completion_ring_num_descs: default_ring_descs(),
            rx_ring_num_descs: default_ring_descs(),
            tx_ring_num_descs: default_ring_descs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// 0 = one worker per available CPU.
    #[serde(default)]
    pub num_workers: usize,
    /// Reserved sizing hint; receive loops are per-queue regardless.
    #[serde(default)]
    pub workers_per_queue: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            workers_per_queue: 0,
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    crate::constants::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
    /// `monitor` observes only; `respond` arms response synthesis.
    #[serde(default = "default_response_mode")]
    pub mode: String,
    /// Answer blocked queries with a synthesized response.
    #[serde(default)]
    pub block_response: bool,
    /// true = NXDOMAIN, false = REFUSED.
    #[serde(default = "default_true")]
    pub nxdomain: bool,
}

fn default_response_mode() -> String {
    "monitor".to_string()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            mode: default_response_mode(),
            block_response: false,
            nxdomain: true,
        }
    }
}

impl ResponseConfig {
    /// Effective response arming: both the mode and the flag gate it.
    pub fn responds(&self) -> bool {
        self.mode.eq_ignore_ascii_case("respond") && self.block_response
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9153".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceConfig {
    /// Clamp to one queue and one worker.
    #[serde(default)]
    pub single_core: bool,
    /// Pin the process to this core; negative disables pinning.
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: i32,
    /// Silence logging below ERROR once startup completes.
    #[serde(default)]
    pub disable_log: bool,
}

fn default_cpu_affinity() -> i32 {
    -1
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            single_core: false,
            cpu_affinity: default_cpu_affinity(),
            disable_log: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Loading and validation ──────────────────────────────────────────

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.is_empty() {
            return Err(ConfigError::Validation {
                field: "interface".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.xdp.num_frames == 0 {
            return Err(ConfigError::Validation {
                field: "xdp.num_frames".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        if self.xdp.frame_size < 2048 || !self.xdp.frame_size.is_power_of_two() {
            return Err(ConfigError::Validation {
                field: "xdp.frame_size".to_string(),
                message: format!(
                    "{} must be a power of two >= 2048",
                    self.xdp.frame_size
                ),
            });
        }
        for (field, value) in [
            ("xdp.fill_ring_num_descs", self.xdp.fill_ring_num_descs),
            (
                "xdp.completion_ring_num_descs",
                self.xdp.completion_ring_num_descs,
            ),
            ("xdp.rx_ring_num_descs", self.xdp.rx_ring_num_descs),
            ("xdp.tx_ring_num_descs", self.xdp.tx_ring_num_descs),
        ] {
            if value == 0 || !value.is_power_of_two() {
                return Err(ConfigError::Validation {
                    field: field.to_string(),
                    message: format!("{value} must be a power of two > 0"),
                });
            }
        }

        if !matches!(
            self.response.mode.to_ascii_lowercase().as_str(),
            "monitor" | "respond"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "response.mode".to_string(),
                value: self.response.mode.clone(),
                expected: "monitor, respond".to_string(),
            });
        }

        if !self.metrics.path.starts_with('/') {
            return Err(ConfigError::Validation {
                field: "metrics.path".to_string(),
                message: format!("'{}' must start with '/'", self.metrics.path),
            });
        }

        if !matches!(
            self.logging.format.to_ascii_lowercase().as_str(),
            "text" | "json"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
                expected: "text, json".to_string(),
            });
        }

        Ok(())
    }

    /// Ports the steering program should redirect; defaults to 53 when
    /// the list is empty.
    pub fn effective_dns_ports(&self) -> Vec<u16> {
        if self.dns.listen_ports.is_empty() {
            vec![53]
        } else {
            self.dns.listen_ports.clone()
        }
    }

    /// Queue count after the single-core clamp.
    pub fn effective_queue_count(&self) -> u32 {
        if self.performance.single_core {
            1
        } else {
            self.queue_count
        }
    }

    /// Worker count after defaults and the single-core clamp.
    pub fn effective_num_workers(&self) -> usize {
        if self.performance.single_core {
            return 1;
        }
        if self.workers.num_workers > 0 {
            self.workers.num_workers
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "interface: eth0\n";

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.interface, "eth0");
        assert_eq!(cfg.rules_path, "configs/rules.yaml");
        assert_eq!(cfg.queue_start, 0);
        assert_eq!(cfg.queue_count, 0);
        assert_eq!(cfg.dns.listen_ports, vec![53]);
        assert_eq!(cfg.xdp.num_frames, 4096);
        assert_eq!(cfg.xdp.frame_size, 2048);
        assert_eq!(cfg.xdp.rx_ring_num_descs, 2048);
        assert_eq!(cfg.workers.batch_size, 64);
        assert!(!cfg.response.block_response);
        assert!(cfg.response.nxdomain);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.performance.cpu_affinity, -1);
        assert!(cfg.logging.enabled);
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
interface: ens5
bpf_path: bpf/xdp_dns_filter.o
rules_path: /etc/dnsguard/rules.yaml
queue_start: 2
queue_count: 4
dns:
  listen_ports: [53, 5353]
xdp:
  num_frames: 8192
  frame_size: 4096
  fill_ring_num_descs: 4096
  completion_ring_num_descs: 4096
  rx_ring_num_descs: 4096
  tx_ring_num_descs: 1024
workers:
  num_workers: 8
  workers_per_queue: 2
  batch_size: 128
response:
  mode: respond
  block_response: true
  nxdomain: false
metrics:
  enabled: true
  listen: 0.0.0.0:9153
  path: /metrics
performance:
  single_core: false
  cpu_affinity: 3
  disable_log: false
logging:
  enabled: true
  level: debug
  format: json
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.queue_count, 4);
        assert_eq!(cfg.dns.listen_ports, vec![53, 5353]);
        assert_eq!(cfg.xdp.frame_size, 4096);
        assert!(cfg.response.responds());
        assert!(!cfg.response.nxdomain);
        assert_eq!(cfg.performance.cpu_affinity, 3);
    }

    #[test]
    fn empty_interface_rejected() {
        assert!(matches!(
            Config::from_yaml("interface: ''\n").unwrap_err(),
            ConfigError::Validation { .. }
        ));
    }

    #[test]
    fn bad_frame_size_rejected() {
        for bad in ["1024", "3000"] {
            let yaml = format!("interface: eth0\nxdp:\n  frame_size: {bad}\n");
            assert!(
                matches!(
                    Config::from_yaml(&yaml).unwrap_err(),
                    ConfigError::Validation { .. }
                ),
                "frame_size {bad} should fail"
            );
        }
    }

    #[test]
    fn bad_ring_size_rejected() {
        let yaml = "interface: eth0\nxdp:\n  rx_ring_num_descs: 1000\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn bad_response_mode_rejected() {
        let yaml = "interface: eth0\nresponse:\n  mode: bogus\n";
        assert!(matches!(
            Config::from_yaml(yaml).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn unknown_keys_rejected() {
        let yaml = "interface: eth0\nnot_a_key: 1\n";
        assert!(matches!(
            Config::from_yaml(yaml).unwrap_err(),
            ConfigError::Yaml(_)
        ));
    }

    #[test]
    fn monitor_mode_never_responds() {
        let yaml = "interface: eth0\nresponse:\n  block_response: true\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert!(!cfg.response.responds());
    }

    #[test]
    fn empty_port_list_defaults_to_53() {
        let yaml = "interface: eth0\ndns:\n  listen_ports: []\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.effective_dns_ports(), vec![53]);
    }

    #[test]
    fn single_core_clamps_queues_and_workers() {
        let yaml = "interface: eth0\nqueue_count: 8\nworkers:\n  num_workers: 16\nperformance:\n  single_core: true\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.effective_queue_count(), 1);
        assert_eq!(cfg.effective_num_workers(), 1);
    }
}
