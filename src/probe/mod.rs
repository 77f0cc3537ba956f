//! Endpoint latency probing and selection

pub mod latency;
pub mod selector;

pub use latency::{HttpProbe, Latency, LatencyProber, Probe, ProbeResult, ProberConfig};
pub use selector::{rank, select_best};
