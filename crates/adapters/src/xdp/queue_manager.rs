use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::ebpf::steering::SteeringProgram;

use super::error::XdpError;
use super::socket::{RingConfig, XskSocket};
use super::umem::UmemArena;

#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    pub interface: String,
    pub queue_start: u32,
    /// Number of queues to drive; 0 probes the interface.
    pub queue_count: u32,
    pub num_frames: u32,
    pub frame_size: u32,
    pub rings: RingConfig,
}

/// Owns one `XskSocket` per hardware RX queue.
///
/// Startup policy: the requested queue range is clamped to what the
/// interface exposes; socket creation/registration failures after the
/// first queue degrade to the successful prefix, while a first-queue
/// failure aborts startup.
pub struct QueueManager {
    queue_start: u32,
    sockets: Vec<Arc<XskSocket>>,
}

impl QueueManager {
    /// Resolve an interface name to its index.
    pub fn ifindex(interface: &str) -> Result<u32, XdpError> {
        let name = CString::new(interface).map_err(|_| XdpError::InterfaceMissing {
            interface: interface.to_string(),
        })?;
        // SAFETY: name is a valid NUL-terminated string.
        let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if idx == 0 {
            return Err(XdpError::InterfaceMissing {
                interface: interface.to_string(),
            });
        }
        Ok(idx)
    }

    /// Count the interface's RX queues via its sysfs queue directory.
    /// Falls back to 1 when the directory cannot be read.
    pub fn rx_queue_count(interface: &str) -> u32 {
        let dir = Path::new("/sys/class/net").join(interface).join("queues");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return 1;
        };
        let count = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("rx-"))
            .count() as u32;
        count.max(1)
    }

    /// Create and register sockets for `[queue_start, queue_start + n)`.
    pub fn new(
        cfg: &QueueManagerConfig,
        steering: &mut SteeringProgram,
    ) -> Result<Self, XdpError> {
        let ifindex = Self::ifindex(&cfg.interface)?;

        let max_queues = Self::rx_queue_count(&cfg.interface);
        let requested = cfg.queue_count;
        let queue_count = if requested == 0 {
            max_queues
        } else if requested > max_queues {
            warn!(
                requested,
                available = max_queues,
                interface = %cfg.interface,
                "requested more queues than the interface exposes, clamping"
            );
            max_queues
        } else {
            requested
        };

        let mut sockets = Vec::with_capacity(queue_count as usize);
        for i in 0..queue_count {
            let queue_id = cfg.queue_start + i;

            let socket = UmemArena::alloc(cfg.num_frames, cfg.frame_size)
                .and_then(|arena| XskSocket::bind(ifindex, queue_id, arena, cfg.rings));
            let socket = match socket {
                Ok(s) => s,
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        queue_id,
                        error = %e,
                        "queue socket creation failed, continuing with {i} queue(s)"
                    );
                    break;
                }
            };

            if let Err(e) = steering.register(queue_id, socket.fd()) {
                if i == 0 {
                    return Err(XdpError::QueueUnavailable {
                        queue_id,
                        source: std::io::Error::other(e.to_string()),
                    });
                }
                warn!(
                    queue_id,
                    error = %e,
                    "queue registration failed, continuing with {i} queue(s)"
                );
                break;
            }

            info!(queue_id, fd = socket.fd(), "queue socket registered");
            sockets.push(Arc::new(socket));
        }

        if sockets.is_empty() {
            return Err(XdpError::InvalidConfig("no queues could be created".into()));
        }

        Ok(Self {
            queue_start: cfg.queue_start,
            sockets,
        })
    }

    pub fn queue_start(&self) -> u32 {
        self.queue_start
    }

    pub fn queue_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn sockets(&self) -> &[Arc<XskSocket>] {
        &self.sockets
    }

    /// Tear down in reverse creation order, unregistering each queue
    /// from the steering program before its socket is dropped. Errors
    /// are logged, never propagated — shutdown is best-effort.
    pub fn close(mut self, steering: &mut SteeringProgram) {
        while let Some(socket) = self.sockets.pop() {
            let queue_id = socket.queue_id();
            if let Err(e) = steering.unregister(queue_id) {
                warn!(queue_id, error = %e, "queue unregister failed");
            }
            drop(socket);
        }
    }
}
