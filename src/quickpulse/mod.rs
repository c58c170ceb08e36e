//! Live metrics: lock-free per-interval counters of requests, dependencies and exceptions,
//! drained periodically by a publisher.

pub mod collector;
pub mod counters;
pub mod publisher;

pub use collector::QuickPulseCollector;
pub use counters::{FinalCounters, LiveDocument, DEFAULT_MAX_DOCUMENTS};
pub use publisher::{LiveMetricsPublisher, LogSink, SnapshotSink};
