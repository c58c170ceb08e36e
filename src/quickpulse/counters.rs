use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

/// Documents kept per interval unless configured otherwise.
pub const DEFAULT_MAX_DOCUMENTS: usize = 1000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CountAndDuration {
    pub count: u32,
    /// Milliseconds.
    pub duration: u32,
}

impl CountAndDuration {
    /// Adds to both halves, saturating each one separately so a long duration can never spill
    /// into the count.
    pub fn saturating_add(self, count: u32, duration_ms: u64) -> Self {
        let duration_ms = u32::try_from(duration_ms).unwrap_or(u32::MAX);
        CountAndDuration {
            count: self.count.saturating_add(count),
            duration: self.duration.saturating_add(duration_ms),
        }
    }
}

/// Packs a count into the high and a duration into the low 32 bits of one word.
pub fn encode(value: CountAndDuration) -> u64 {
    (u64::from(value.count) << 32) | u64::from(value.duration)
}

pub fn decode(word: u64) -> CountAndDuration {
    CountAndDuration {
        count: (word >> 32) as u32,
        duration: word as u32,
    }
}

/// A count and a total duration updated together through one compare-and-swap.
#[derive(Debug, Default)]
pub struct PackedCounter(AtomicU64);

impl PackedCounter {
    pub fn add(&self, count: u32, duration_ms: u64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = encode(decode(current).saturating_add(count, duration_ms));
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn get(&self) -> CountAndDuration {
        decode(self.0.load(Ordering::Acquire))
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "kebab-case"))]
#[derive(Clone, Debug, PartialEq)]
pub enum LiveDocument {
    Request {
        operation_id: Option<String>,
        name: String,
        success: bool,
        duration_ms: u64,
        response_code: String,
        properties: BTreeMap<String, String>,
    },
    Dependency {
        operation_id: Option<String>,
        name: String,
        command: String,
        target: String,
        dependency_type: String,
        success: bool,
        duration_ms: u64,
        result_code: String,
        properties: BTreeMap<String, String>,
    },
    Exception {
        operation_id: Option<String>,
        exception_type: String,
        message: String,
        stack: String,
    },
}

/// Fixed number of write-once slots. Writers reserve a slot with a single `fetch_add`; once the
/// slots run out further documents are dropped.
#[derive(Debug)]
struct DocumentBuffer {
    slots: Box<[OnceLock<LiveDocument>]>,
    next: AtomicUsize,
}

impl DocumentBuffer {
    fn new(capacity: usize) -> Self {
        DocumentBuffer {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn push(&self, build: impl FnOnce() -> LiveDocument) {
        if self.next.load(Ordering::Relaxed) >= self.slots.len() {
            return;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = self.slots.get(index) {
            let _ = slot.set(build());
        }
    }

    fn snapshot(&self) -> Vec<LiveDocument> {
        self.slots
            .iter()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }
}

/// One interval's worth of live metrics, written concurrently by any number of threads.
#[derive(Debug)]
pub struct Counters {
    pub(crate) instrumentation_key: String,
    requests: PackedCounter,
    unsuccessful_requests: AtomicU64,
    dependencies: PackedCounter,
    unsuccessful_dependencies: AtomicU64,
    exceptions: AtomicU64,
    documents: DocumentBuffer,
}

impl Counters {
    pub fn new(instrumentation_key: impl Into<String>, max_documents: usize) -> Self {
        Counters {
            instrumentation_key: instrumentation_key.into(),
            requests: PackedCounter::default(),
            unsuccessful_requests: AtomicU64::new(0),
            dependencies: PackedCounter::default(),
            unsuccessful_dependencies: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            documents: DocumentBuffer::new(max_documents),
        }
    }

    /// A fresh, zeroed set for the same key and document capacity.
    pub fn restarted(&self) -> Self {
        Counters::new(self.instrumentation_key.clone(), self.documents.slots.len())
    }

    pub fn add_request(&self, weight: u32, duration: Duration, success: bool) {
        self.requests.add(weight, duration_ms(duration));
        if !success {
            self.unsuccessful_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_dependency(&self, weight: u32, duration: Duration, success: bool) {
        self.dependencies.add(weight, duration_ms(duration));
        if !success {
            self.unsuccessful_dependencies
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_exception(&self, weight: u32) {
        self.exceptions
            .fetch_add(u64::from(weight), Ordering::Relaxed);
    }

    pub fn add_document(&self, build: impl FnOnce() -> LiveDocument) {
        self.documents.push(build);
    }

    pub fn to_final(&self) -> FinalCounters {
        let requests = self.requests.get();
        let dependencies = self.dependencies.get();
        FinalCounters {
            requests: u64::from(requests.count),
            requests_duration: u64::from(requests.duration),
            unsuccessful_requests: self.unsuccessful_requests.load(Ordering::Acquire),
            dependencies: u64::from(dependencies.count),
            dependencies_duration: u64::from(dependencies.duration),
            unsuccessful_dependencies: self.unsuccessful_dependencies.load(Ordering::Acquire),
            exceptions: self.exceptions.load(Ordering::Acquire),
            documents: self.documents.snapshot(),
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Decoded snapshot of [`Counters`], handed to whoever publishes live metrics.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalCounters {
    pub requests: u64,
    /// Milliseconds.
    pub requests_duration: u64,
    pub unsuccessful_requests: u64,
    pub dependencies: u64,
    /// Milliseconds.
    pub dependencies_duration: u64,
    pub unsuccessful_dependencies: u64,
    pub exceptions: u64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub documents: Vec<LiveDocument>,
}

impl FinalCounters {
    pub fn is_zero(&self) -> bool {
        *self == FinalCounters::default()
    }

    /// Adds what a counter set gained between two of its snapshots. Documents are not carried.
    pub(crate) fn add_growth(&mut self, before: &FinalCounters, after: &FinalCounters) {
        let grow = |total: &mut u64, before: u64, after: u64| {
            *total = total.saturating_add(after.saturating_sub(before));
        };
        grow(&mut self.requests, before.requests, after.requests);
        grow(
            &mut self.requests_duration,
            before.requests_duration,
            after.requests_duration,
        );
        grow(
            &mut self.unsuccessful_requests,
            before.unsuccessful_requests,
            after.unsuccessful_requests,
        );
        grow(&mut self.dependencies, before.dependencies, after.dependencies);
        grow(
            &mut self.dependencies_duration,
            before.dependencies_duration,
            after.dependencies_duration,
        );
        grow(
            &mut self.unsuccessful_dependencies,
            before.unsuccessful_dependencies,
            after.unsuccessful_dependencies,
        );
        grow(&mut self.exceptions, before.exceptions, after.exceptions);
    }
}
