use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;

use crate::quickpulse::collector::QuickPulseCollector;
use crate::quickpulse::counters::FinalCounters;
use crate::timer::PeriodicTask;

/// Destination for the counters drained from a collector once per interval.
pub trait SnapshotSink: Send {
    fn publish(&mut self, counters: &FinalCounters) -> Result<(), Error>;
}

impl<F> SnapshotSink for F
where
    F: FnMut(&FinalCounters) -> Result<(), Error> + Send,
{
    fn publish(&mut self, counters: &FinalCounters) -> Result<(), Error> {
        self(counters)
    }
}

/// Logs a one-line summary per interval.
#[derive(Debug, Default)]
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn publish(&mut self, counters: &FinalCounters) -> Result<(), Error> {
        log::info!(
            "live metrics: requests={} ({} failed, {}ms) dependencies={} ({} failed, {}ms) exceptions={} documents={}",
            counters.requests,
            counters.unsuccessful_requests,
            counters.requests_duration,
            counters.dependencies,
            counters.unsuccessful_dependencies,
            counters.dependencies_duration,
            counters.exceptions,
            counters.documents.len(),
        );
        Ok(())
    }
}

/// Drains a collector every `interval` and hands the result to a sink.
pub struct LiveMetricsPublisher {
    task: PeriodicTask,
}

impl LiveMetricsPublisher {
    pub fn start<S>(
        collector: Arc<QuickPulseCollector>,
        interval: Duration,
        mut sink: S,
    ) -> Result<Self, Error>
    where
        S: SnapshotSink + 'static,
    {
        let task = PeriodicTask::spawn("live-metrics-publisher", interval, move || {
            match collector.get_and_restart() {
                Some(counters) => {
                    if let Err(err) = sink.publish(&counters) {
                        log::warn!("failed to publish live metrics: {err:#}");
                    }
                }
                None => log::trace!("live metrics collector is disabled, nothing to publish"),
            }
            ControlFlow::Continue(())
        })?;
        Ok(LiveMetricsPublisher { task })
    }

    pub fn stop(self, timeout: Duration) -> Result<(), Error> {
        self.task.stop(timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use anyhow::anyhow;

    use super::*;
    use crate::types::TelemetryItem;

    const KEY: &str = "key";

    #[test]
    fn publishes_drained_counters() {
        let collector = Arc::new(QuickPulseCollector::default());
        collector.enable(KEY);
        collector.add(&TelemetryItem::request(KEY, Duration::from_millis(5), false));
        collector.add(&TelemetryItem::exception(KEY, "E"));

        let (tx, rx) = mpsc::channel();
        let publisher = LiveMetricsPublisher::start(
            collector.clone(),
            Duration::from_millis(10),
            move |counters: &FinalCounters| -> Result<(), Error> {
                tx.send(counters.clone())?;
                Ok(())
            },
        )
        .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.requests, 1);
        assert_eq!(first.unsuccessful_requests, 1);
        assert_eq!(first.requests_duration, 5);
        assert_eq!(first.exceptions, 1);

        // drained, so the next interval starts from zero
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(second.is_zero());

        publisher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn sink_errors_do_not_stop_publishing() {
        let collector = Arc::new(QuickPulseCollector::default());
        collector.enable(KEY);

        let (tx, rx) = mpsc::channel();
        let publisher = LiveMetricsPublisher::start(
            collector,
            Duration::from_millis(5),
            move |_: &FinalCounters| -> Result<(), Error> {
                let _ = tx.send(());
                Err(anyhow!("sink unavailable"))
            },
        )
        .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        publisher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn disabled_collector_publishes_nothing() {
        let collector = Arc::new(QuickPulseCollector::default());
        let (tx, rx) = mpsc::channel();
        let publisher = LiveMetricsPublisher::start(
            collector,
            Duration::from_millis(5),
            move |counters: &FinalCounters| -> Result<(), Error> {
                tx.send(counters.clone())?;
                Ok(())
            },
        )
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        publisher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn log_sink_accepts_anything() {
        LogSink.publish(&FinalCounters::default()).unwrap();
    }
}
