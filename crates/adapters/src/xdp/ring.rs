use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::XdpError;

// ── Kernel ABI (<linux/if_xdp.h>) ───────────────────────────────────

pub const SOL_XDP: libc::c_int = 283;

pub const XDP_MMAP_OFFSETS: libc::c_int = 1;
pub const XDP_RX_RING: libc::c_int = 2;
pub const XDP_TX_RING: libc::c_int = 3;
pub const XDP_UMEM_REG: libc::c_int = 4;
pub const XDP_UMEM_FILL_RING: libc::c_int = 5;
pub const XDP_UMEM_COMPLETION_RING: libc::c_int = 6;

pub const XDP_PGOFF_RX_RING: libc::off_t = 0;
pub const XDP_PGOFF_TX_RING: libc::off_t = 0x80000000;
pub const XDP_UMEM_PGOFF_FILL_RING: libc::off_t = 0x100000000;
pub const XDP_UMEM_PGOFF_COMPLETION_RING: libc::off_t = 0x180000000;

/// `struct xdp_umem_reg`
#[repr(C)]
pub struct XdpUmemReg {
    pub addr: u64,
    pub len: u64,
    pub chunk_size: u32,
    pub headroom: u32,
    pub flags: u32,
}

/// `struct xdp_ring_offset`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct XdpRingOffset {
    pub producer: u64,
    pub consumer: u64,
    pub desc: u64,
    pub flags: u64,
}

/// `struct xdp_mmap_offsets`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct XdpMmapOffsets {
    pub rx: XdpRingOffset,
    pub tx: XdpRingOffset,
    pub fr: XdpRingOffset,
    pub cr: XdpRingOffset,
}

/// `struct xdp_desc`: one RX/TX ring slot. Fill and Completion slots
/// are bare u64 frame offsets.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameDesc {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

/// `struct sockaddr_xdp`
#[repr(C)]
pub struct SockaddrXdp {
    pub sxdp_family: u16,
    pub sxdp_flags: u16,
    pub sxdp_ifindex: u32,
    pub sxdp_queue_id: u32,
    pub sxdp_shared_umem_fd: u32,
}

// ── Ring mapping ────────────────────────────────────────────────────

/// One mmap'd ring region; unmaps on drop.
struct RingMap {
    ptr: *mut u8,
    map_len: usize,
}

impl Drop for RingMap {
    fn drop(&mut self) {
        // SAFETY: ptr/map_len come from the successful mmap in map_ring.
        unsafe {
            libc::munmap(self.ptr.cast(), self.map_len);
        }
    }
}

fn map_ring(
    fd: libc::c_int,
    pgoff: libc::off_t,
    offsets: &XdpRingOffset,
    entries: u32,
    entry_size: usize,
    what: &'static str,
) -> Result<RingMap, XdpError> {
    let map_len = offsets.desc as usize + entries as usize * entry_size;
    // SAFETY: shared mapping of the socket's ring region; the kernel
    // validates pgoff and length.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd,
            pgoff,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(XdpError::Syscall {
            what,
            source: io::Error::last_os_error(),
        });
    }
    Ok(RingMap {
        ptr: ptr.cast(),
        map_len,
    })
}

// ── Producer / consumer views ───────────────────────────────────────
//
// Each ring is single-producer/single-consumer across the user/kernel
// boundary. The user side is exactly one of the two roles per ring:
// producer on Fill and TX, consumer on RX and Completion. Producer and
// consumer indices are free-running u32s; the slot is `index & mask`.
//
// Memory-order contract: the producer writes slots, then publishes with
// a release store to its index; the consumer takes an acquire load of
// the producer index before reading slots, and releases slots back with
// a release store to the consumer index. This is stated explicitly with
// atomic operations rather than fences so the pairing is visible at
// every call site.

/// User-space producer view of a kernel-consumed ring (Fill, TX).
pub struct ProducerRing<T: Copy> {
    /// Owns the mmap; unmapped on drop.
    _map: RingMap,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    desc: *mut T,
    size: u32,
    mask: u32,
    /// Local mirror of our own producer index; the kernel never writes it.
    local_prod: u32,
}

// SAFETY: raw pointers target the mmap'd region which lives as long as
// the ring; external synchronization (the owning socket's mutex) keeps
// use single-threaded on the user side.
unsafe impl<T: Copy> Send for ProducerRing<T> {}

impl<T: Copy> ProducerRing<T> {
    fn new(map: RingMap, offsets: &XdpRingOffset, size: u32) -> Self {
        // SAFETY: producer/consumer/desc offsets come from the kernel's
        // XDP_MMAP_OFFSETS answer for this very mapping.
        unsafe {
            let producer = map.ptr.add(offsets.producer as usize).cast::<AtomicU32>();
            let consumer = map.ptr.add(offsets.consumer as usize).cast::<AtomicU32>();
            let desc = map.ptr.add(offsets.desc as usize).cast::<T>();
            let local_prod = (*producer).load(Ordering::Relaxed);
            Self {
                _map: map,
                producer,
                consumer,
                desc,
                size,
                mask: size - 1,
                local_prod,
            }
        }
    }

    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Slots currently available for production.
    pub fn free_slots(&self) -> u32 {
        // SAFETY: pointer valid for the life of the mapping.
        let cons = unsafe { (*self.consumer).load(Ordering::Acquire) };
        self.size - self.local_prod.wrapping_sub(cons)
    }

    /// Write up to `entries.len()` slots and publish them with a single
    /// release store. Returns the number accepted.
    pub fn produce(&mut self, entries: &[T]) -> usize {
        let n = (self.free_slots() as usize).min(entries.len());
        for (i, entry) in entries[..n].iter().enumerate() {
            let slot = (self.local_prod.wrapping_add(i as u32) & self.mask) as usize;
            // SAFETY: slot < size, and slots in [consumer, producer+free)
            // are ours to write until published.
            unsafe {
                self.desc.add(slot).write(*entry);
            }
        }
        self.local_prod = self.local_prod.wrapping_add(n as u32);
        // SAFETY: publishing index store pairs with the kernel's acquire.
        unsafe {
            (*self.producer).store(self.local_prod, Ordering::Release);
        }
        n
    }
}

/// User-space consumer view of a kernel-produced ring (RX, Completion).
pub struct ConsumerRing<T: Copy> {
    /// Owns the mmap; unmapped on drop.
    _map: RingMap,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    desc: *const T,
    mask: u32,
    /// Local mirror of our own consumer index; the kernel never writes it.
    local_cons: u32,
}

// SAFETY: as for ProducerRing.
unsafe impl<T: Copy> Send for ConsumerRing<T> {}

impl<T: Copy> ConsumerRing<T> {
    fn new(map: RingMap, offsets: &XdpRingOffset, size: u32) -> Self {
        // SAFETY: offsets from XDP_MMAP_OFFSETS for this mapping.
        unsafe {
            let producer = map.ptr.add(offsets.producer as usize).cast::<AtomicU32>();
            let consumer = map.ptr.add(offsets.consumer as usize).cast::<AtomicU32>();
            let desc = map.ptr.add(offsets.desc as usize).cast::<T>();
            let local_cons = (*consumer).load(Ordering::Relaxed);
            Self {
                _map: map,
                producer,
                consumer,
                desc,
                mask: size - 1,
                local_cons,
            }
        }
    }

    /// Entries available for consumption. The acquire load here makes
    /// all descriptor writes for slots below the observed producer
    /// index visible.
    pub fn available(&self) -> u32 {
        // SAFETY: pointer valid for the life of the mapping.
        let prod = unsafe { (*self.producer).load(Ordering::Acquire) };
        prod.wrapping_sub(self.local_cons)
    }

    /// Read up to `out.len()` entries and release the slots back to the
    /// kernel. Returns the number read.
    pub fn consume(&mut self, out: &mut [T]) -> usize {
        let n = (self.available() as usize).min(out.len());
        for (i, slot_out) in out[..n].iter_mut().enumerate() {
            let slot = (self.local_cons.wrapping_add(i as u32) & self.mask) as usize;
            // SAFETY: slots below the acquired producer index hold
            // fully-written descriptors.
            unsafe {
                *slot_out = self.desc.add(slot).read();
            }
        }
        self.local_cons = self.local_cons.wrapping_add(n as u32);
        // SAFETY: release store returns the slots to the kernel.
        unsafe {
            (*self.consumer).store(self.local_cons, Ordering::Release);
        }
        n
    }
}

// ── Construction from a bound socket ────────────────────────────────

/// Mmap the user side of the Fill ring (producer of frame offsets).
pub fn map_fill_ring(
    fd: libc::c_int,
    offsets: &XdpMmapOffsets,
    entries: u32,
) -> Result<ProducerRing<u64>, XdpError> {
    let map = map_ring(
        fd,
        XDP_UMEM_PGOFF_FILL_RING,
        &offsets.fr,
        entries,
        std::mem::size_of::<u64>(),
        "mmap fill ring",
    )?;
    Ok(ProducerRing::new(map, &offsets.fr, entries))
}

/// Mmap the user side of the Completion ring (consumer of frame offsets).
pub fn map_completion_ring(
    fd: libc::c_int,
    offsets: &XdpMmapOffsets,
    entries: u32,
) -> Result<ConsumerRing<u64>, XdpError> {
    let map = map_ring(
        fd,
        XDP_UMEM_PGOFF_COMPLETION_RING,
        &offsets.cr,
        entries,
        std::mem::size_of::<u64>(),
        "mmap completion ring",
    )?;
    Ok(ConsumerRing::new(map, &offsets.cr, entries))
}

/// Mmap the user side of the RX ring (consumer of descriptors).
pub fn map_rx_ring(
    fd: libc::c_int,
    offsets: &XdpMmapOffsets,
    entries: u32,
) -> Result<ConsumerRing<FrameDesc>, XdpError> {
    let map = map_ring(
        fd,
        XDP_PGOFF_RX_RING,
        &offsets.rx,
        entries,
        std::mem::size_of::<FrameDesc>(),
        "mmap rx ring",
    )?;
    Ok(ConsumerRing::new(map, &offsets.rx, entries))
}

/// Mmap the user side of the TX ring (producer of descriptors).
pub fn map_tx_ring(
    fd: libc::c_int,
    offsets: &XdpMmapOffsets,
    entries: u32,
) -> Result<ProducerRing<FrameDesc>, XdpError> {
    let map = map_ring(
        fd,
        XDP_PGOFF_TX_RING,
        &offsets.tx,
        entries,
        std::mem::size_of::<FrameDesc>(),
        "mmap tx ring",
    )?;
    Ok(ProducerRing::new(map, &offsets.tx, entries))
}
