//! Lifecycle of the in-kernel steering program.
//!
//! The program itself is a prebuilt XDP object file; this module loads
//! it, resolves its maps, attaches it to the interface, and manages the
//! per-queue redirection state.

pub mod steering;

pub use steering::{SteeringError, SteeringMetrics, SteeringProgram};
