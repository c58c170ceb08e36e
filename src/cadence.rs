use anyhow::Error;
use cadence::prelude::*;
use cadence::{MetricSink, StatsdClient};

use crate::quickpulse::{FinalCounters, SnapshotSink};

/// Publishes each interval's live metrics as statsd gauges through any cadence sink.
pub struct StatsdSink {
    client: StatsdClient,
}

impl StatsdSink {
    pub fn new<S>(prefix: &str, sink: S) -> StatsdSink
    where
        S: MetricSink + Sync + Send + std::panic::RefUnwindSafe + 'static,
    {
        StatsdSink {
            client: StatsdClient::from_sink(prefix, sink),
        }
    }
}

impl SnapshotSink for StatsdSink {
    fn publish(&mut self, counters: &FinalCounters) -> Result<(), Error> {
        self.client.gauge("requests", counters.requests)?;
        self.client
            .gauge("requests.failed", counters.unsuccessful_requests)?;
        self.client
            .gauge("requests.duration_ms", counters.requests_duration)?;
        self.client.gauge("dependencies", counters.dependencies)?;
        self.client
            .gauge("dependencies.failed", counters.unsuccessful_dependencies)?;
        self.client
            .gauge("dependencies.duration_ms", counters.dependencies_duration)?;
        self.client.gauge("exceptions", counters.exceptions)?;
        Ok(())
    }
}
