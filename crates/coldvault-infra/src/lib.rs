//! Process-level infrastructure: tracing setup and the disk-health probe
//! that gates download admission.

pub mod disk;
pub mod telemetry;

pub use disk::{DiskHealthGate, DiskHealthMonitor};
pub use telemetry::init_telemetry;
