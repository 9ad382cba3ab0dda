use std::io;
use std::ptr;

use super::error::XdpError;

/// Minimum UMEM chunk size accepted by the kernel.
pub const MIN_FRAME_SIZE: u32 = 2048;

/// Contiguous, page-aligned memory region subdivided into fixed-size
/// frames and registered with the kernel as an AF_XDP UMEM.
///
/// Frames are addressed by byte offset from the arena base, exactly as
/// they appear in ring descriptors. The arena hands out raw views; the
/// owning socket enforces exclusive frame ownership through move-only
/// `FrameHandle`s.
pub struct UmemArena {
    base: *mut u8,
    len: usize,
    frame_size: u32,
    num_frames: u32,
}

// SAFETY: the arena is plain shared memory; all aliasing discipline is
// enforced by the frame-ownership protocol above it.
unsafe impl Send for UmemArena {}
unsafe impl Sync for UmemArena {}

impl UmemArena {
    /// Allocate an arena of `num_frames × frame_size` bytes.
    ///
    /// `frame_size` must be a power of two and at least 2048 (the
    /// kernel's minimum chunk size).
    pub fn alloc(num_frames: u32, frame_size: u32) -> Result<Self, XdpError> {
        if num_frames == 0 {
            return Err(XdpError::InvalidConfig("num_frames must be > 0".into()));
        }
        if frame_size < MIN_FRAME_SIZE || !frame_size.is_power_of_two() {
            return Err(XdpError::InvalidConfig(format!(
                "frame_size {frame_size} must be a power of two >= {MIN_FRAME_SIZE}"
            )));
        }

        let len = num_frames as usize * frame_size as usize;

        // SAFETY: plain anonymous mapping; MAP_POPULATE prefaults the
        // pages so the fast path never takes a soft fault.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(XdpError::ResourceLimit {
                what: "UMEM arena",
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            base: base.cast(),
            len,
            frame_size,
            num_frames,
        })
    }

    pub fn base_addr(&self) -> u64 {
        self.base as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// All frame offsets, in arena order. Used to seed the free pool.
    pub fn frame_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_frames).map(move |i| u64::from(i) * u64::from(self.frame_size))
    }

    /// Round an address down to the base of its chunk. RX descriptors
    /// point at packet data, which sits behind the kernel's headroom
    /// inside the chunk; recycling must hand back the chunk base.
    pub fn chunk_base(&self, addr: u64) -> u64 {
        addr & !u64::from(self.frame_size - 1)
    }

    /// Borrow `len` bytes at `addr`.
    ///
    /// Panics if the range falls outside the arena — descriptors from
    /// the kernel are always in range, so an out-of-range address is a
    /// frame-accounting bug, not an I/O condition.
    pub fn frame(&self, addr: u64, len: u32) -> &[u8] {
        self.check_range(addr, len);
        // SAFETY: range checked above; exclusivity is guaranteed by the
        // caller holding the frame's handle.
        unsafe { std::slice::from_raw_parts(self.base.add(addr as usize), len as usize) }
    }

    /// Borrow the full chunk at `addr` mutably. `addr` must be a chunk
    /// base (frames handed out by the free pool always are).
    ///
    /// The caller must hold the frame's `FrameHandle`; the handle being
    /// move-only makes the returned slice effectively exclusive.
    pub fn frame_mut(&self, addr: u64) -> &mut [u8] {
        assert_eq!(self.chunk_base(addr), addr, "frame_mut on unaligned address");
        self.check_range(addr, self.frame_size);
        // SAFETY: range checked; exclusivity per the handle protocol.
        unsafe {
            std::slice::from_raw_parts_mut(self.base.add(addr as usize), self.frame_size as usize)
        }
    }

    fn check_range(&self, addr: u64, len: u32) {
        let end = addr as usize + len as usize;
        assert!(
            end <= self.len,
            "frame range {addr}+{len} outside arena of {} bytes",
            self.len
        );
    }
}

impl Drop for UmemArena {
    fn drop(&mut self) {
        // SAFETY: base/len come from the successful mmap in alloc().
        unsafe {
            libc::munmap(self.base.cast(), self.len);
        }
    }
}
