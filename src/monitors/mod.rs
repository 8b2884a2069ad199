//! Host health monitoring
//!
//! Three layers, composed by the daemon:
//!
//! - [`health`] - the collector: turns "now" into a [`health::HealthSnapshot`]
//!   (CPU, memory, disk, uptime, failed units) with short-TTL caching
//! - [`thresholds`] - the threshold engine: consumes snapshots, raises and
//!   clears deduplicated alerts in the store
//! - [`service`] - the monitor service: the periodic loop driving both,
//!   supervised by the daemon kernel

pub mod health;
pub mod service;
pub mod thresholds;

pub use health::{HealthCollector, HealthSnapshot};
pub use service::{MonitorHandle, MonitorService};
pub use thresholds::ThresholdEngine;
