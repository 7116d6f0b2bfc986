//! Host resource sampling and the adaptive worker pool built on it.

pub mod monitor;
pub mod pool;

pub use monitor::{FixedMonitor, ResourceMonitor, ResourceSample, SystemMonitor};
pub use pool::{recommended_workers, AdaptiveWorkerPool, WorkerPermit, WorkerPool};
