use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;

use crate::middleware::{Middleware, Overloaded};
use crate::quickpulse::{LiveMetricsPublisher, QuickPulseCollector};
use crate::types::TelemetryItem;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts every item passing through into a live metrics collector, then forwards it unchanged.
///
/// Placed after a sampling step it sees stamped items and weights them back up, so the counts
/// approximate the traffic before sampling.
pub struct LiveMetrics<M> {
    collector: Arc<QuickPulseCollector>,
    publisher: Option<LiveMetricsPublisher>,
    next: M,
}

impl<M> LiveMetrics<M>
where
    M: Middleware,
{
    pub fn new(collector: Arc<QuickPulseCollector>, next: M) -> Self {
        LiveMetrics {
            collector,
            publisher: None,
            next,
        }
    }

    /// Stops `publisher` and disables the collector on `join`.
    pub fn with_publisher(mut self, publisher: LiveMetricsPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

impl<M> Middleware for LiveMetrics<M>
where
    M: Middleware,
{
    fn join(&mut self) -> Result<(), Error> {
        let stopped = match self.publisher.take() {
            Some(publisher) => publisher.stop(STOP_TIMEOUT),
            None => Ok(()),
        };
        self.collector.disable();
        self.next.join()?;
        stopped
    }

    fn poll(&mut self) -> Result<(), Overloaded> {
        self.next.poll()
    }

    fn submit(&mut self, item: TelemetryItem) -> Result<(), Overloaded> {
        self.collector.add(&item);
        self.next.submit(item)
    }
}
