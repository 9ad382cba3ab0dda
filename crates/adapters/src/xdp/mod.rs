//! AF_XDP user-space plane: UMEM frame arena, kernel-shared rings, the
//! per-queue XSK socket, and the multi-queue manager.

pub mod error;
pub mod queue_manager;
pub mod ring;
pub mod socket;
pub mod umem;

pub use error::XdpError;
pub use queue_manager::{QueueManager, QueueManagerConfig};
pub use ring::FrameDesc;
pub use socket::{FrameHandle, RingConfig, XskSocket};
pub use umem::UmemArena;
