pub mod affinity;
pub mod ebpf;
pub mod http;
pub mod xdp;
