use std::time::Duration;

use anyhow::Error;

use crate::types::TelemetryItem;

pub mod adaptive;
pub mod fixed_rate;
pub mod overrides;
pub mod score;
pub mod settings;

pub use adaptive::AdaptiveSampler;
pub use fixed_rate::FixedRateSampler;
pub use overrides::SamplingOverrides;
pub use settings::{AdaptiveSamplingOptions, AdaptiveSettings};

/// A keep/drop decision shared by every thread that produces telemetry.
pub trait TelemetrySampler: Send + Sync {
    fn is_sampled_in(&self, item: &mut TelemetryItem) -> bool;

    fn sampling_percentage(&self) -> f64;

    /// Stops any background work, waiting at most `timeout` for it to finish.
    fn stop(&self, _timeout: Duration) -> Result<(), Error> {
        Ok(())
    }
}
