use std::io;
use std::os::fd::RawFd;
use std::sync::Mutex;

use tracing::{debug, warn};

use super::error::XdpError;
use super::ring::{
    ConsumerRing, FrameDesc, ProducerRing, SOL_XDP, SockaddrXdp, XDP_MMAP_OFFSETS, XDP_RX_RING,
    XDP_TX_RING, XDP_UMEM_COMPLETION_RING, XDP_UMEM_FILL_RING, XDP_UMEM_REG, XdpMmapOffsets,
    XdpUmemReg, map_completion_ring, map_fill_ring, map_rx_ring, map_tx_ring,
};
use super::umem::UmemArena;

/// Ring capacities for one queue socket. All must be powers of two.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub fill_size: u32,
    pub completion_size: u32,
    pub rx_size: u32,
    pub tx_size: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            fill_size: 2048,
            completion_size: 2048,
            rx_size: 2048,
            tx_size: 2048,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> Result<(), XdpError> {
        for (name, size) in [
            ("fill_ring_num_descs", self.fill_size),
            ("completion_ring_num_descs", self.completion_size),
            ("rx_ring_num_descs", self.rx_size),
            ("tx_ring_num_descs", self.tx_size),
        ] {
            if size == 0 || !size.is_power_of_two() {
                return Err(XdpError::InvalidConfig(format!(
                    "{name} = {size} must be a power of two > 0"
                )));
            }
        }
        Ok(())
    }
}

/// Exclusive title to one UMEM frame.
///
/// The handle is move-only: whoever holds it owns the frame's bytes,
/// and it can only be disposed of by giving it back to the socket
/// (`recycle`) or handing it to the kernel (`transmit`). Dropping a
/// handle on the floor leaks the frame from the pool — a bug the free
/// pool gauge makes visible — and double-return is impossible without
/// constructing a second handle.
#[derive(Debug)]
pub struct FrameHandle {
    addr: u64,
    len: u32,
}

impl FrameHandle {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// RX-side state: touched only by the owning receive loop.
struct RxPath {
    fill: ProducerRing<u64>,
    rx: ConsumerRing<FrameDesc>,
    /// Scratch for refill batches; capacity fixed at fill ring size.
    fill_scratch: Vec<u64>,
    rx_scratch: Vec<FrameDesc>,
}

/// TX-side state: the TX producer and Completion consumer share a lock
/// so any worker may transmit while the ring stays single-producer
/// toward the kernel.
struct TxPath {
    tx: ProducerRing<FrameDesc>,
    completion: ConsumerRing<u64>,
    completion_scratch: Vec<u64>,
}

/// One AF_XDP socket bound to an (interface, RX queue) pair.
///
/// Owns its UMEM arena and the four kernel-shared rings. Frame
/// ownership cycles: free pool → Fill → RX → worker → (free pool | TX
/// → Completion → free pool).
pub struct XskSocket {
    fd: RawFd,
    ifindex: u32,
    queue_id: u32,
    arena: UmemArena,
    rx: Mutex<RxPath>,
    tx: Mutex<TxPath>,
    free: Mutex<Vec<u64>>,
}

impl XskSocket {
    /// Create, configure, and bind a socket for `(ifindex, queue_id)`,
    /// taking ownership of a freshly allocated arena.
    pub fn bind(
        ifindex: u32,
        queue_id: u32,
        arena: UmemArena,
        rings: RingConfig,
    ) -> Result<Self, XdpError> {
        rings.validate()?;

        // SAFETY: plain socket(2); the fd is owned below.
        let fd = unsafe { libc::socket(libc::AF_XDP, libc::SOCK_RAW, 0) };
        if fd < 0 {
            return Err(XdpError::ResourceLimit {
                what: "AF_XDP socket",
                source: io::Error::last_os_error(),
            });
        }

        let result = Self::configure(fd, ifindex, queue_id, arena, rings);
        if result.is_err() {
            // SAFETY: fd from the socket() call above, not yet owned.
            unsafe {
                libc::close(fd);
            }
        }
        result
    }

    fn configure(
        fd: RawFd,
        ifindex: u32,
        queue_id: u32,
        arena: UmemArena,
        rings: RingConfig,
    ) -> Result<Self, XdpError> {
        // Register the arena with the kernel (mapped exactly once).
        let reg = XdpUmemReg {
            addr: arena.base_addr(),
            len: arena.len() as u64,
            chunk_size: arena.frame_size(),
            headroom: 0,
            flags: 0,
        };
        setsockopt(fd, XDP_UMEM_REG, &reg, "XDP_UMEM_REG")?;

        setsockopt(fd, XDP_UMEM_FILL_RING, &rings.fill_size, "XDP_UMEM_FILL_RING")?;
        setsockopt(
            fd,
            XDP_UMEM_COMPLETION_RING,
            &rings.completion_size,
            "XDP_UMEM_COMPLETION_RING",
        )?;
        setsockopt(fd, XDP_RX_RING, &rings.rx_size, "XDP_RX_RING")?;
        setsockopt(fd, XDP_TX_RING, &rings.tx_size, "XDP_TX_RING")?;

        let offsets: XdpMmapOffsets = getsockopt(fd, XDP_MMAP_OFFSETS, "XDP_MMAP_OFFSETS")?;

        let fill = map_fill_ring(fd, &offsets, rings.fill_size)?;
        let completion = map_completion_ring(fd, &offsets, rings.completion_size)?;
        let rx = map_rx_ring(fd, &offsets, rings.rx_size)?;
        let tx = map_tx_ring(fd, &offsets, rings.tx_size)?;

        let addr = SockaddrXdp {
            sxdp_family: libc::AF_XDP as u16,
            sxdp_flags: 0, // let the kernel pick copy vs zero-copy
            sxdp_ifindex: ifindex,
            sxdp_queue_id: queue_id,
            sxdp_shared_umem_fd: 0,
        };
        // SAFETY: addr is a properly sized sockaddr_xdp.
        let ret = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(addr).cast(),
                std::mem::size_of::<SockaddrXdp>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENODEV) => XdpError::InterfaceMissing {
                    interface: format!("ifindex {ifindex}"),
                },
                _ => XdpError::QueueUnavailable {
                    queue_id,
                    source: err,
                },
            });
        }

        // Seed the free pool with every frame in the arena.
        let free: Vec<u64> = arena.frame_offsets().collect();

        debug!(
            ifindex,
            queue_id,
            frames = arena.num_frames(),
            frame_size = arena.frame_size(),
            "AF_XDP socket bound"
        );

        Ok(Self {
            fd,
            ifindex,
            queue_id,
            arena,
            rx: Mutex::new(RxPath {
                fill,
                rx,
                fill_scratch: Vec::with_capacity(rings.fill_size as usize),
                rx_scratch: vec![FrameDesc::default(); rings.rx_size as usize],
            }),
            tx: Mutex::new(TxPath {
                tx,
                completion,
                completion_scratch: vec![0u64; rings.completion_size as usize],
            }),
            free: Mutex::new(free),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    pub fn frame_size(&self) -> u32 {
        self.arena.frame_size()
    }

    /// Frames currently sitting in the user-space free pool.
    pub fn free_frames(&self) -> usize {
        self.free.lock().expect("free pool poisoned").len()
    }

    /// Open slots in the Fill ring.
    pub fn num_free_fill_slots(&self) -> usize {
        self.rx.lock().expect("rx path poisoned").fill.free_slots() as usize
    }

    /// Move frames from the free pool into the Fill ring, up to its
    /// free capacity. Returns the number of frames handed to the
    /// kernel. Called by the receive loop at the top of every
    /// iteration.
    pub fn refill(&self) -> usize {
        let mut rx = self.rx.lock().expect("rx path poisoned");
        let slots = rx.fill.free_slots() as usize;
        if slots == 0 {
            return 0;
        }
        {
            let mut free = self.free.lock().expect("free pool poisoned");
            let take = slots.min(free.len());
            if take == 0 {
                return 0;
            }
            rx.fill_scratch.clear();
            let start = free.len() - take;
            rx.fill_scratch.extend(free.drain(start..));
        }
        let scratch = std::mem::take(&mut rx.fill_scratch);
        let pushed = rx.fill.produce(&scratch);
        // produce() can only refuse entries if the kernel raced the
        // free-slot read; put refused frames back in the pool.
        if pushed < scratch.len() {
            let mut free = self.free.lock().expect("free pool poisoned");
            free.extend_from_slice(&scratch[pushed..]);
        }
        rx.fill_scratch = scratch;
        pushed
    }

    /// Block in poll(2) for up to `timeout_ms`, then report
    /// `(rx_available, completions_available)`.
    pub fn poll(&self, timeout_ms: i32) -> Result<(usize, usize), XdpError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a single valid pollfd.
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok((0, 0));
            }
            return Err(XdpError::Syscall {
                what: "poll",
                source: err,
            });
        }

        let rx_available = self.rx.lock().expect("rx path poisoned").rx.available() as usize;
        let completions = self
            .tx
            .lock()
            .expect("tx path poisoned")
            .completion
            .available() as usize;
        Ok((rx_available, completions))
    }

    /// Consume up to `max` RX descriptors into `out` as owned frame
    /// handles.
    pub fn receive(&self, out: &mut Vec<FrameHandle>, max: usize) -> usize {
        let mut rx = self.rx.lock().expect("rx path poisoned");
        let limit = max.min(rx.rx_scratch.len());
        let mut scratch = std::mem::take(&mut rx.rx_scratch);
        let n = rx.rx.consume(&mut scratch[..limit]);
        for desc in &scratch[..n] {
            out.push(FrameHandle {
                addr: desc.addr,
                len: desc.len,
            });
        }
        rx.rx_scratch = scratch;
        n
    }

    /// Borrow the received bytes of a frame.
    pub fn frame(&self, handle: &FrameHandle) -> &[u8] {
        self.arena.frame(handle.addr, handle.len)
    }

    /// Borrow a frame's full buffer for writing (TX construction).
    pub fn frame_mut(&self, handle: &mut FrameHandle) -> &mut [u8] {
        self.arena.frame_mut(handle.addr)
    }

    /// Take a frame from the free pool for response construction.
    pub fn alloc_frame(&self) -> Option<FrameHandle> {
        self.free
            .lock()
            .expect("free pool poisoned")
            .pop()
            .map(|addr| FrameHandle { addr, len: 0 })
    }

    /// Return a frame to the free pool. RX addresses are rounded down
    /// to their chunk base so the frame re-enters the cycle whole.
    pub fn recycle(&self, handle: FrameHandle) {
        let base = self.arena.chunk_base(handle.addr);
        self.free.lock().expect("free pool poisoned").push(base);
    }

    /// Queue a frame for transmission (`len` bytes are valid) and kick
    /// the kernel. On a full TX ring the handle is returned to the
    /// caller untouched.
    pub fn transmit(&self, handle: FrameHandle, len: u32) -> Result<(), FrameHandle> {
        {
            let mut tx = self.tx.lock().expect("tx path poisoned");
            let desc = FrameDesc {
                addr: handle.addr,
                len,
                options: 0,
            };
            if tx.tx.produce(std::slice::from_ref(&desc)) == 0 {
                return Err(handle);
            }
        }
        self.kick_tx();
        Ok(())
    }

    /// Drain the Completion ring, returning transmitted frames to the
    /// free pool. Returns the number reclaimed.
    pub fn complete(&self) -> usize {
        let mut tx = self.tx.lock().expect("tx path poisoned");
        let mut scratch = std::mem::take(&mut tx.completion_scratch);
        let n = tx.completion.consume(&mut scratch);
        if n > 0 {
            let mut free = self.free.lock().expect("free pool poisoned");
            free.extend(scratch[..n].iter().map(|&addr| self.arena.chunk_base(addr)));
        }
        tx.completion_scratch = scratch;
        n
    }

    /// Tell the kernel the TX ring has work.
    fn kick_tx(&self) {
        // SAFETY: zero-length sendto on our own fd; used purely as a
        // doorbell.
        let ret = unsafe {
            libc::sendto(
                self.fd,
                std::ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                std::ptr::null(),
                0,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Transient queue pressure is expected; anything else is
            // worth a log line but never fatal per packet.
            if !matches!(
                err.raw_os_error(),
                Some(libc::EAGAIN | libc::EBUSY | libc::ENOBUFS)
            ) {
                warn!(queue_id = self.queue_id, error = %err, "TX kick failed");
            }
        }
    }
}

impl Drop for XskSocket {
    fn drop(&mut self) {
        // Best-effort drain of transmitted frames before unmapping.
        self.complete();
        // SAFETY: fd owned by this socket; closing releases the kernel's
        // ring references and unbinds the queue.
        unsafe {
            libc::close(self.fd);
        }
        debug!(
            ifindex = self.ifindex,
            queue_id = self.queue_id,
            "AF_XDP socket closed"
        );
    }
}

// ── setsockopt / getsockopt helpers ─────────────────────────────────

fn setsockopt<T>(
    fd: RawFd,
    option: libc::c_int,
    value: &T,
    what: &'static str,
) -> Result<(), XdpError> {
    // SAFETY: value is a valid, properly sized option payload.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_XDP,
            option,
            std::ptr::from_ref(value).cast(),
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(XdpError::Syscall {
            what,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn getsockopt<T: Default>(
    fd: RawFd,
    option: libc::c_int,
    what: &'static str,
) -> Result<T, XdpError> {
    let mut value = T::default();
    let mut len = std::mem::size_of::<T>() as libc::socklen_t;
    // SAFETY: value is a valid out-buffer of the advertised size.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            SOL_XDP,
            option,
            std::ptr::addr_of_mut!(value).cast(),
            &mut len,
        )
    };
    if ret < 0 {
        return Err(XdpError::Syscall {
            what,
            source: io::Error::last_os_error(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_config_default_is_valid() {
        assert!(RingConfig::default().validate().is_ok());
    }

    #[test]
    fn ring_config_rejects_non_power_of_two() {
        let mut cfg = RingConfig::default();
        cfg.rx_size = 1000;
        assert!(cfg.validate().is_err());
        cfg.rx_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn frame_handle_reports_length() {
        let h = FrameHandle { addr: 2048, len: 60 };
        assert_eq!(h.len(), 60);
        assert!(!h.is_empty());
        let empty = FrameHandle { addr: 0, len: 0 };
        assert!(empty.is_empty());
    }
}
