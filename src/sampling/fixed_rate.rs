use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::sampling::overrides::SamplingOverrides;
use crate::sampling::score::sampling_score;
use crate::sampling::TelemetrySampler;
use crate::types::{TelemetryItem, TelemetryType};

const EPSILON: f64 = 1e-12;

/// Keeps a fixed percentage of telemetry, deciding per item from its sampling score.
///
/// All state is atomic so a single instance can be shared by every producing thread, and the
/// percentage can be changed at runtime (the adaptive sampler does exactly that).
#[derive(Debug)]
pub struct FixedRateSampler {
    // f64 bits
    sampling_percentage: AtomicU64,
    exclude_types: AtomicU8,
    include_types: AtomicU8,
    overrides: SamplingOverrides,
}

impl Default for FixedRateSampler {
    fn default() -> Self {
        FixedRateSampler::new(100.0)
    }
}

impl FixedRateSampler {
    pub fn new(sampling_percentage: f64) -> Self {
        FixedRateSampler {
            sampling_percentage: AtomicU64::new(sanitize(sampling_percentage).to_bits()),
            exclude_types: AtomicU8::new(0),
            include_types: AtomicU8::new(0),
            overrides: SamplingOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: SamplingOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn sampling_percentage(&self) -> f64 {
        f64::from_bits(self.sampling_percentage.load(Ordering::Acquire))
    }

    pub fn set_sampling_percentage(&self, sampling_percentage: f64) {
        self.sampling_percentage
            .store(sanitize(sampling_percentage).to_bits(), Ordering::Release);
    }

    pub fn exclude_types(&self) -> Vec<TelemetryType> {
        types_from_bits(self.exclude_types.load(Ordering::Acquire))
    }

    /// Replaces the excluded types with a comma-separated list such as `"Request, Trace"`.
    pub fn set_exclude_types(&self, types: &str) {
        self.exclude_types
            .store(parse_type_list(types), Ordering::Release);
    }

    pub fn include_types(&self) -> Vec<TelemetryType> {
        types_from_bits(self.include_types.load(Ordering::Acquire))
    }

    pub fn set_include_types(&self, types: &str) {
        self.include_types
            .store(parse_type_list(types), Ordering::Release);
    }

    /// Decides whether `item` is kept. Kept items that were scored get stamped with the
    /// percentage they were sampled at.
    pub fn is_sampled_in(&self, item: &mut TelemetryItem) -> bool {
        let sampling_percentage = self.sampling_percentage();
        if sampling_percentage >= 100.0 - EPSILON {
            return true;
        }

        let ty = item.ty();
        if !ty.supports_sampling() {
            return true;
        }

        let bit = ty.bit();
        if self.exclude_types.load(Ordering::Acquire) & bit != 0 {
            return true;
        }
        let include_types = self.include_types.load(Ordering::Acquire);
        if include_types != 0 && include_types & bit == 0 {
            return true;
        }

        let effective_percentage = item
            .sampling_percentage()
            .or_else(|| self.overrides.percentage_for(item))
            .unwrap_or(sampling_percentage);

        if sampling_score(item) < effective_percentage {
            item.set_sampling_percentage(effective_percentage);
            true
        } else {
            false
        }
    }
}

impl TelemetrySampler for FixedRateSampler {
    fn is_sampled_in(&self, item: &mut TelemetryItem) -> bool {
        FixedRateSampler::is_sampled_in(self, item)
    }

    fn sampling_percentage(&self) -> f64 {
        FixedRateSampler::sampling_percentage(self)
    }
}

fn sanitize(sampling_percentage: f64) -> f64 {
    if sampling_percentage.is_nan() {
        100.0
    } else {
        sampling_percentage.clamp(0.0, 100.0)
    }
}

fn parse_type_list(types: &str) -> u8 {
    let mut bits = 0;
    for name in types.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        match TelemetryType::from_sampling_name(name) {
            Some(ty) => bits |= ty.bit(),
            None => log::warn!("unknown telemetry type {name:?} in sampling type list, ignoring"),
        }
    }
    bits
}

fn types_from_bits(bits: u8) -> Vec<TelemetryType> {
    TelemetryType::SAMPLEABLE
        .into_iter()
        .filter(|ty| bits & ty.bit() != 0)
        .collect()
}
