use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use arc_swap::ArcSwapOption;

use crate::quickpulse::counters::{duration_ms, Counters, FinalCounters, LiveDocument};
use crate::types::{TelemetryData, TelemetryItem};

// How long `get_and_restart` yields for writers still holding the old set before moving on.
const QUIESCE_SPINS: usize = 1000;

/// A drained counter set that a writer still held when it was drained.
#[derive(Debug)]
struct Lagging {
    counters: Arc<Counters>,
    reported: FinalCounters,
}

/// Live metrics counters for one instrumentation key.
///
/// Construct one per process (or per tenant) and share it with `Arc`. It starts disabled;
/// [`QuickPulseCollector::enable`] installs a zeroed counter set. Producers call
/// [`QuickPulseCollector::add`] from any thread without taking a lock, and a single consumer
/// drains the counters with [`QuickPulseCollector::get_and_restart`].
#[derive(Debug)]
pub struct QuickPulseCollector {
    counters: ArcSwapOption<Counters>,
    // growth of these is folded into the next drain
    lagging: Mutex<Vec<Lagging>>,
    max_documents: usize,
}

impl Default for QuickPulseCollector {
    fn default() -> Self {
        QuickPulseCollector::new(crate::quickpulse::counters::DEFAULT_MAX_DOCUMENTS)
    }
}

impl QuickPulseCollector {
    /// `max_documents` bounds the live documents kept per interval; zero keeps none.
    pub fn new(max_documents: usize) -> Self {
        QuickPulseCollector {
            counters: ArcSwapOption::empty(),
            lagging: Mutex::new(Vec::new()),
            max_documents,
        }
    }

    /// Starts counting telemetry for `instrumentation_key`, discarding anything counted before.
    pub fn enable(&self, instrumentation_key: &str) {
        self.lagging_sets().clear();
        self.counters.store(Some(Arc::new(Counters::new(
            instrumentation_key,
            self.max_documents,
        ))));
    }

    pub fn disable(&self) {
        self.counters.store(None);
        self.lagging_sets().clear();
    }

    fn lagging_sets(&self) -> std::sync::MutexGuard<'_, Vec<Lagging>> {
        self.lagging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.counters.load().is_some()
    }

    /// Current counts, without resetting them. `None` while disabled.
    pub fn peek(&self) -> Option<FinalCounters> {
        self.counters.load().as_deref().map(Counters::to_final)
    }

    /// Swaps in zeroed counters and returns what the previous set had counted. `None` while
    /// disabled.
    ///
    /// A writer that loaded the previous set just before the swap may still be updating it. If
    /// it has not let go after a short wait, whatever it adds later is returned by the next call
    /// instead, so nothing is lost or counted twice.
    pub fn get_and_restart(&self) -> Option<FinalCounters> {
        let mut lagging = self.lagging_sets();
        let previous = self
            .counters
            .rcu(|current| current.as_ref().map(|counters| Arc::new(counters.restarted())))?;

        for _ in 0..QUIESCE_SPINS {
            if Arc::strong_count(&previous) == 1 {
                break;
            }
            thread::yield_now();
        }

        let reported = previous.to_final();
        let mut result = reported.clone();
        for set in lagging.iter_mut() {
            let now = set.counters.to_final();
            result.add_growth(&set.reported, &now);
            set.reported = now;
        }
        lagging.retain(|set| Arc::strong_count(&set.counters) > 1);
        if Arc::strong_count(&previous) > 1 {
            lagging.push(Lagging {
                counters: previous,
                reported,
            });
        }
        Some(result)
    }

    pub fn add(&self, item: &TelemetryItem) {
        let guard = self.counters.load();
        let Some(counters) = guard.as_deref() else {
            return;
        };
        if counters.instrumentation_key != item.instrumentation_key {
            return;
        }

        // a sampled item stands for 100/percentage original ones
        let weight = match item.sampling_percentage() {
            None => 1,
            Some(percentage) if percentage > 0.0 => (100.0 / percentage).round() as u32,
            Some(_) => return,
        };

        match &item.data {
            TelemetryData::Request {
                name,
                duration,
                success,
                response_code,
            } => {
                counters.add_request(weight, *duration, *success);
                counters.add_document(|| LiveDocument::Request {
                    operation_id: item.operation_id.clone(),
                    name: name.clone(),
                    success: *success,
                    duration_ms: duration_ms(*duration),
                    response_code: response_code.clone(),
                    properties: item.attributes.clone(),
                });
            }
            TelemetryData::Dependency {
                name,
                command,
                target,
                dependency_type,
                duration,
                success,
                result_code,
            } => {
                counters.add_dependency(weight, *duration, *success);
                counters.add_document(|| LiveDocument::Dependency {
                    operation_id: item.operation_id.clone(),
                    name: name.clone(),
                    command: command.clone(),
                    target: target.clone(),
                    dependency_type: dependency_type.clone(),
                    success: *success,
                    duration_ms: duration_ms(*duration),
                    result_code: result_code.clone(),
                    properties: item.attributes.clone(),
                });
            }
            TelemetryData::Exception {
                type_name,
                message,
                stack,
            } => {
                counters.add_exception(weight);
                counters.add_document(|| LiveDocument::Exception {
                    operation_id: item.operation_id.clone(),
                    exception_type: type_name.clone(),
                    message: message.clone(),
                    stack: stack.clone(),
                });
            }
            TelemetryData::Event { .. }
            | TelemetryData::PageView { .. }
            | TelemetryData::Trace { .. }
            | TelemetryData::Metric { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const KEY: &str = "fake-instrumentation-key";

    fn request(duration_ms: u64, success: bool) -> TelemetryItem {
        TelemetryItem::request(KEY, Duration::from_millis(duration_ms), success)
    }

    fn dependency(duration_ms: u64, success: bool) -> TelemetryItem {
        TelemetryItem::dependency(KEY, Duration::from_millis(duration_ms), success)
    }

    fn enabled() -> QuickPulseCollector {
        let collector = QuickPulseCollector::default();
        collector.enable(KEY);
        collector
    }

    #[test]
    fn initial_state_is_disabled() {
        let collector = QuickPulseCollector::default();
        assert!(!collector.is_enabled());
        assert_eq!(collector.peek(), None);
        assert_eq!(collector.get_and_restart(), None);
        // draining a disabled collector must not enable it
        assert_eq!(collector.peek(), None);
    }

    #[test]
    fn empty_counts_after_enable() {
        assert!(enabled().peek().unwrap().is_zero());
    }

    #[test]
    fn disable_discards_counters() {
        let collector = enabled();
        collector.add(&request(10, true));
        collector.disable();
        assert_eq!(collector.peek(), None);
        // no-op while disabled
        collector.add(&request(10, true));
        assert_eq!(collector.peek(), None);
    }

    #[test]
    fn requests_are_counted_and_durations_summed() {
        let collector = enabled();

        collector.add(&request(112_233, true));
        let counters = collector.peek().unwrap();
        assert_eq!(counters.requests, 1);
        assert_eq!(counters.unsuccessful_requests, 0);
        assert_eq!(counters.requests_duration, 112_233);

        collector.add(&request(65_421, true));
        let counters = collector.peek().unwrap();
        assert_eq!(counters.requests, 2);
        assert_eq!(counters.requests_duration, 112_233 + 65_421);

        collector.add(&request(9_988, false));
        let counters = collector.get_and_restart().unwrap();
        assert_eq!(counters.requests, 3);
        assert_eq!(counters.unsuccessful_requests, 1);
        assert_eq!(counters.requests_duration, 112_233 + 65_421 + 9_988);
        assert_eq!(counters.documents.len(), 3);

        assert!(collector.peek().unwrap().is_zero());
    }

    #[test]
    fn dependencies_are_counted_and_durations_summed() {
        let collector = enabled();
        collector.add(&dependency(112_233, true));
        collector.add(&dependency(334_455, true));
        collector.add(&dependency(123_456, false));

        let counters = collector.get_and_restart().unwrap();
        assert_eq!(counters.dependencies, 3);
        assert_eq!(counters.unsuccessful_dependencies, 1);
        assert_eq!(counters.dependencies_duration, 112_233 + 334_455 + 123_456);
        assert_eq!(counters.requests, 0);

        assert!(collector.peek().unwrap().is_zero());
    }

    #[test]
    fn exceptions_are_counted() {
        let collector = enabled();
        collector.add(&TelemetryItem::exception(KEY, "java.lang.Exception"));
        assert_eq!(collector.peek().unwrap().exceptions, 1);
        collector.add(&TelemetryItem::exception(KEY, "java.lang.Exception"));
        assert_eq!(collector.get_and_restart().unwrap().exceptions, 2);
        assert!(collector.peek().unwrap().is_zero());
    }

    #[test]
    fn other_keys_and_kinds_are_ignored() {
        let collector = enabled();
        for duration in [100, 200, 300] {
            collector.add(&request(duration, true));
        }
        collector.add(&TelemetryItem::request(
            "other-key",
            Duration::from_millis(50),
            false,
        ));
        collector.add(&TelemetryItem::new(
            KEY,
            TelemetryData::Trace {
                message: "hello".to_string(),
            },
        ));

        let counters = collector.get_and_restart().unwrap();
        assert_eq!(counters.requests, 3);
        assert_eq!(counters.requests_duration, 600);
        assert_eq!(counters.unsuccessful_requests, 0);
        assert_eq!(counters.exceptions, 0);
    }

    #[test]
    fn sampled_items_are_weighted() {
        let collector = enabled();

        let mut item = request(40, true);
        item.set_sampling_percentage(25.0);
        collector.add(&item);

        let mut item = TelemetryItem::exception(KEY, "E");
        item.set_sampling_percentage(50.0);
        collector.add(&item);

        let mut item = request(40, false);
        item.set_sampling_percentage(0.0);
        collector.add(&item);

        let counters = collector.peek().unwrap();
        assert_eq!(counters.requests, 4);
        assert_eq!(counters.requests_duration, 40);
        assert_eq!(counters.unsuccessful_requests, 0);
        assert_eq!(counters.exceptions, 2);
    }

    #[test]
    fn concurrent_adds_lose_nothing() {
        const THREADS: u64 = 8;
        const ITERATIONS: u64 = 10_000;
        const DURATION: u64 = 7;

        let collector = Arc::new(enabled());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        collector.add(&request(DURATION, true));
                        collector.add(&dependency(DURATION, false));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counters = collector.get_and_restart().unwrap();
        assert_eq!(counters.requests, THREADS * ITERATIONS);
        assert_eq!(counters.requests_duration, THREADS * ITERATIONS * DURATION);
        assert_eq!(counters.dependencies, THREADS * ITERATIONS);
        assert_eq!(counters.unsuccessful_dependencies, THREADS * ITERATIONS);
        assert_eq!(counters.documents.len(), 1000);
        assert!(collector.peek().unwrap().is_zero());
    }

    #[test]
    fn draining_while_adding_neither_loses_nor_double_counts() {
        let collector = Arc::new(enabled());
        let writer = {
            let collector = collector.clone();
            thread::spawn(move || {
                for _ in 0..50_000 {
                    collector.add(&request(1, true));
                }
            })
        };

        let mut total = 0;
        while !writer.is_finished() {
            total += collector.get_and_restart().unwrap().requests;
        }
        writer.join().unwrap();
        total += collector.get_and_restart().unwrap().requests;
        assert_eq!(total, 50_000);
    }

    #[test]
    fn late_writes_to_drained_set_are_reported_next_time() {
        let collector = enabled();
        collector.add(&request(10, true));

        // a writer that loaded the set just before the drain
        let held = collector.counters.load_full().unwrap();
        let drained = collector.get_and_restart().unwrap();
        assert_eq!(drained.requests, 1);

        held.add_request(1, Duration::from_millis(5), false);
        held.add_exception(2);
        collector.add(&request(7, true));

        let next = collector.get_and_restart().unwrap();
        assert_eq!(next.requests, 2);
        assert_eq!(next.requests_duration, 12);
        assert_eq!(next.unsuccessful_requests, 1);
        assert_eq!(next.exceptions, 2);

        // still held, still tracked; reported once only
        held.add_request(1, Duration::from_millis(1), true);
        drop(held);
        let last = collector.get_and_restart().unwrap();
        assert_eq!(last.requests, 1);
        assert_eq!(last.requests_duration, 1);
        assert!(collector.get_and_restart().unwrap().is_zero());
        assert!(collector.lagging_sets().is_empty());
    }

    #[test]
    fn disable_races_with_adders() {
        let collector = Arc::new(enabled());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        collector.add(&request(1, true));
                    }
                })
            })
            .collect();
        collector.disable();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collector.peek(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn snapshot_shape() {
        let collector = QuickPulseCollector::new(0);
        collector.enable(KEY);
        collector.add(&request(100, true));
        collector.add(&request(200, false));
        collector.add(&dependency(30, true));
        collector.add(&TelemetryItem::exception(KEY, "E"));
        insta::assert_yaml_snapshot!(collector.get_and_restart().unwrap(), @r###"
        ---
        requests: 2
        requests_duration: 300
        unsuccessful_requests: 1
        dependencies: 1
        dependencies_duration: 30
        unsuccessful_dependencies: 0
        exceptions: 1
        "###);
    }
}
