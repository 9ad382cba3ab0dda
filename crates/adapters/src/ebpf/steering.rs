use std::os::fd::RawFd;
use std::path::Path;

use aya::Ebpf;
use aya::maps::{Array, HashMap, MapData, PerCpuArray, XskMap};
use aya::programs::{Xdp, XdpFlags, xdp::XdpLinkId};
use thiserror::Error;
use tracing::{info, warn};

/// XDP program entry point in the steering object file.
const PROGRAM_NAME: &str = "xdp_dns_filter";
/// Array keyed by queue_id; non-zero enables redirection for the queue.
const QUEUE_MAP: &str = "qidconf_map";
/// XSK map keyed by queue_id holding the target socket.
const SOCKET_MAP: &str = "xsks_map";
/// Set of UDP destination ports treated as DNS (key u16, value marker).
const DNS_PORTS_MAP: &str = "dns_ports_map";
/// Optional per-CPU counters maintained by the program.
const METRICS_MAP: &str = "metrics_map";

#[derive(Debug, Error)]
pub enum SteeringError {
    #[error("steering program load failed: {0}")]
    ProgramLoadFailed(String),

    #[error("map '{name}' not found in steering object")]
    MapMissing { name: &'static str },

    #[error("attach to '{interface}' failed: {reason}")]
    AttachFailed { interface: String, reason: String },

    #[error("update of map '{map}' failed: {reason}")]
    MapUpdate { map: &'static str, reason: String },

    #[error("steering object has no metrics map")]
    MetricsUnavailable,
}

/// Kernel-side counters summed across CPUs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SteeringMetrics {
    pub total: u64,
    pub dns: u64,
    pub redirected: u64,
    pub blocked: u64,
    pub passed: u64,
}

/// Per-CPU slot layout of the metrics map (5 × u64).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct CounterSlot {
    total: u64,
    dns: u64,
    redirected: u64,
    blocked: u64,
    passed: u64,
}

// SAFETY: plain-old-data, repr(C), no padding.
unsafe impl aya::Pod for CounterSlot {}

/// Handle to the loaded steering program and its maps.
///
/// Queue state machine: `register` flips a queue to Enabled (socket
/// published + redirect flag set); `unregister` returns it to
/// Unconfigured by clearing the redirect flag — a queue redirects iff
/// both maps carry a non-zero entry for it, so the stale socket entry
/// is inert.
pub struct SteeringProgram {
    ebpf: Ebpf,
    queues: Array<MapData, u32>,
    sockets: XskMap<MapData>,
    dns_ports: HashMap<MapData, u16, u8>,
    metrics: Option<PerCpuArray<MapData, CounterSlot>>,
    attached: Option<(String, XdpLinkId)>,
}

impl SteeringProgram {
    /// Load the steering object file and resolve its maps. The program
    /// passes the verifier here; attachment is a separate step.
    pub fn load(object_path: &Path) -> Result<Self, SteeringError> {
        let mut ebpf = Ebpf::load_file(object_path)
            .map_err(|e| SteeringError::ProgramLoadFailed(e.to_string()))?;

        // Best-effort: forward in-kernel log statements, if any.
        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            warn!("eBPF logger init failed (non-fatal): {e}");
        }

        {
            let program: &mut Xdp = ebpf
                .program_mut(PROGRAM_NAME)
                .ok_or_else(|| {
                    SteeringError::ProgramLoadFailed(format!(
                        "program '{PROGRAM_NAME}' not found in object"
                    ))
                })?
                .try_into()
                .map_err(|e: aya::programs::ProgramError| {
                    SteeringError::ProgramLoadFailed(e.to_string())
                })?;
            program
                .load()
                .map_err(|e| SteeringError::ProgramLoadFailed(e.to_string()))?;
        }

        let queues = Array::try_from(
            ebpf.take_map(QUEUE_MAP)
                .ok_or(SteeringError::MapMissing { name: QUEUE_MAP })?,
        )
        .map_err(|e| SteeringError::ProgramLoadFailed(e.to_string()))?;

        let sockets = XskMap::try_from(
            ebpf.take_map(SOCKET_MAP)
                .ok_or(SteeringError::MapMissing { name: SOCKET_MAP })?,
        )
        .map_err(|e| SteeringError::ProgramLoadFailed(e.to_string()))?;

        let dns_ports = HashMap::try_from(
            ebpf.take_map(DNS_PORTS_MAP)
                .ok_or(SteeringError::MapMissing {
                    name: DNS_PORTS_MAP,
                })?,
        )
        .map_err(|e| SteeringError::ProgramLoadFailed(e.to_string()))?;

        // Metrics map is optional in the object.
        let metrics = match ebpf.take_map(METRICS_MAP) {
            Some(map) => match PerCpuArray::try_from(map) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("metrics map has unexpected shape, ignoring: {e}");
                    None
                }
            },
            None => None,
        };

        info!(path = %object_path.display(), "steering program loaded");
        Ok(Self {
            ebpf,
            queues,
            sockets,
            dns_ports,
            metrics,
            attached: None,
        })
    }

    /// Overwrite the DNS-port set to exactly `ports`.
    pub fn set_dns_ports(&mut self, ports: &[u16]) -> Result<(), SteeringError> {
        let existing: Vec<u16> = self
            .dns_ports
            .keys()
            .collect::<Result<_, _>>()
            .map_err(|e| SteeringError::MapUpdate {
                map: DNS_PORTS_MAP,
                reason: e.to_string(),
            })?;
        for port in existing {
            self.dns_ports
                .remove(&port)
                .map_err(|e| SteeringError::MapUpdate {
                    map: DNS_PORTS_MAP,
                    reason: e.to_string(),
                })?;
        }
        for &port in ports {
            self.dns_ports
                .insert(port, 1u8, 0)
                .map_err(|e| SteeringError::MapUpdate {
                    map: DNS_PORTS_MAP,
                    reason: e.to_string(),
                })?;
        }
        info!(?ports, "DNS port set installed");
        Ok(())
    }

    /// Attach to the interface ingress, replacing any program already
    /// attached there (default XDP netlink semantics).
    pub fn attach(&mut self, interface: &str) -> Result<(), SteeringError> {
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(SteeringError::AttachFailed {
                interface: interface.to_string(),
                reason: "program handle lost".to_string(),
            })?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| SteeringError::AttachFailed {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;

        let link = program
            .attach(interface, XdpFlags::default())
            .map_err(|e| SteeringError::AttachFailed {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;
        self.attached = Some((interface.to_string(), link));
        info!(interface, "steering program attached");
        Ok(())
    }

    /// Detach from the interface. Idempotent: a second call is a no-op.
    pub fn detach(&mut self) -> Result<(), SteeringError> {
        let Some((interface, link)) = self.attached.take() else {
            return Ok(());
        };
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(SteeringError::AttachFailed {
                interface: interface.clone(),
                reason: "program handle lost".to_string(),
            })?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| SteeringError::AttachFailed {
                interface: interface.clone(),
                reason: e.to_string(),
            })?;
        program.detach(link).map_err(|e| SteeringError::AttachFailed {
            interface: interface.clone(),
            reason: e.to_string(),
        })?;
        info!(interface, "steering program detached");
        Ok(())
    }

    /// Enable redirection for a queue: publish the socket, then flip
    /// the queue flag.
    pub fn register(&mut self, queue_id: u32, socket_fd: RawFd) -> Result<(), SteeringError> {
        self.sockets
            .set(queue_id, socket_fd, 0)
            .map_err(|e| SteeringError::MapUpdate {
                map: SOCKET_MAP,
                reason: e.to_string(),
            })?;
        self.queues
            .set(queue_id, 1, 0)
            .map_err(|e| SteeringError::MapUpdate {
                map: QUEUE_MAP,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Disable redirection for a queue.
    pub fn unregister(&mut self, queue_id: u32) -> Result<(), SteeringError> {
        self.queues
            .set(queue_id, 0, 0)
            .map_err(|e| SteeringError::MapUpdate {
                map: QUEUE_MAP,
                reason: e.to_string(),
            })
    }

    /// Sum the program's per-CPU counters.
    pub fn read_metrics(&self) -> Result<SteeringMetrics, SteeringError> {
        let map = self
            .metrics
            .as_ref()
            .ok_or(SteeringError::MetricsUnavailable)?;
        let values = map.get(&0, 0).map_err(|e| SteeringError::MapUpdate {
            map: METRICS_MAP,
            reason: e.to_string(),
        })?;

        let mut out = SteeringMetrics::default();
        for slot in values.iter() {
            out.total += slot.total;
            out.dns += slot.dns;
            out.redirected += slot.redirected;
            out.blocked += slot.blocked;
            out.passed += slot.passed;
        }
        Ok(out)
    }
}
