#![forbid(unsafe_code)]

pub mod packet_pipeline;
