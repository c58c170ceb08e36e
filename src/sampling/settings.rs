use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_TELEMETRIES_PER_SECOND: i32 = 100;
const DEFAULT_EVALUATION_INTERVAL_IN_SECONDS: i32 = 900;
const DEFAULT_SAMPLING_PERCENTAGE_DECREASE_TIMEOUT_IN_SECONDS: i32 = 120;
const DEFAULT_SAMPLING_PERCENTAGE_INCREASE_TIMEOUT_IN_SECONDS: i32 = 900;
const DEFAULT_MIN_SAMPLING_PERCENTAGE: i32 = 1;
const DEFAULT_MAX_SAMPLING_PERCENTAGE: i32 = 100;
const DEFAULT_INITIAL_SAMPLING_PERCENTAGE: f64 = 100.0;
const DEFAULT_MOVING_AVERAGE_RATIO: f64 = 0.25;

/// Raw adaptive sampling configuration, exactly as the user wrote it.
///
/// Every value is optional and string-typed; [`AdaptiveSettings::from_options`] turns it into
/// numbers, falling back to defaults instead of failing.
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdaptiveSamplingOptions {
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub max_telemetries_per_second: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub evaluation_interval_in_seconds: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub sampling_percentage_decrease_timeout_in_seconds: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub sampling_percentage_increase_timeout_in_seconds: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub min_sampling_percentage: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub max_sampling_percentage: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub initial_sampling_percentage: Option<String>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "lenient::deserialize"))]
    pub moving_average_ratio: Option<String>,
}

/// Parsed adaptive sampling configuration. Immutable once the sampler is built.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveSettings {
    pub max_telemetries_per_second: f64,
    pub evaluation_interval: Duration,
    pub sampling_percentage_decrease_timeout: Duration,
    pub sampling_percentage_increase_timeout: Duration,
    pub min_sampling_percentage: f64,
    pub max_sampling_percentage: f64,
    pub initial_sampling_percentage: f64,
    pub moving_average_ratio: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        AdaptiveSettings::from_options(&AdaptiveSamplingOptions::default())
    }
}

impl AdaptiveSettings {
    pub fn from_options(options: &AdaptiveSamplingOptions) -> Self {
        let seconds = |name, raw: &Option<String>, default| {
            Duration::from_secs(value_or_default(name, raw, default, 0, i32::MAX) as u64)
        };

        AdaptiveSettings {
            max_telemetries_per_second: f64::from(value_or_default(
                "maxTelemetriesPerSecond",
                &options.max_telemetries_per_second,
                DEFAULT_MAX_TELEMETRIES_PER_SECOND,
                0,
                i32::MAX,
            )),
            evaluation_interval: seconds(
                "evaluationIntervalInSec",
                &options.evaluation_interval_in_seconds,
                DEFAULT_EVALUATION_INTERVAL_IN_SECONDS,
            ),
            sampling_percentage_decrease_timeout: seconds(
                "samplingPercentageDecreaseTimeoutInSec",
                &options.sampling_percentage_decrease_timeout_in_seconds,
                DEFAULT_SAMPLING_PERCENTAGE_DECREASE_TIMEOUT_IN_SECONDS,
            ),
            sampling_percentage_increase_timeout: seconds(
                "samplingPercentageIncreaseTimeoutInSec",
                &options.sampling_percentage_increase_timeout_in_seconds,
                DEFAULT_SAMPLING_PERCENTAGE_INCREASE_TIMEOUT_IN_SECONDS,
            ),
            min_sampling_percentage: f64::from(value_or_default(
                "minSamplingPercentage",
                &options.min_sampling_percentage,
                DEFAULT_MIN_SAMPLING_PERCENTAGE,
                0,
                100,
            )),
            max_sampling_percentage: f64::from(value_or_default(
                "maxSamplingPercentage",
                &options.max_sampling_percentage,
                DEFAULT_MAX_SAMPLING_PERCENTAGE,
                0,
                100,
            )),
            initial_sampling_percentage: value_or_default(
                "initialSamplingPercentage",
                &options.initial_sampling_percentage,
                DEFAULT_INITIAL_SAMPLING_PERCENTAGE,
                0.0,
                100.0,
            ),
            moving_average_ratio: value_or_default(
                "movingAverageRatio",
                &options.moving_average_ratio,
                DEFAULT_MOVING_AVERAGE_RATIO,
                0.0,
                100.0,
            ),
        }
    }
}

/// Parses `raw`, keeping only strictly positive values, then clamps into `[min, max]`.
fn value_or_default<T>(name: &str, raw: &Option<String>, default: T, min: T, max: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + Display,
{
    let mut result = match raw.as_deref().map(|s| s.trim().parse::<T>()) {
        Some(Ok(value)) if value > T::default() => value,
        Some(_) => {
            log::debug!("{name}: ignoring {raw:?}, using default {default}");
            default
        }
        None => default,
    };

    if result > max {
        result = max;
    }
    if result < min {
        result = min;
    }

    log::trace!("{name} is set to {result}");
    result
}

#[cfg(feature = "serde")]
mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Integer(i64),
        Float(f64),
        Bool(bool),
        Text(String),
    }

    /// Accepts numbers as well as strings, so `100` and `"100"` mean the same thing.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
            Raw::Integer(value) => value.to_string(),
            Raw::Float(value) => value.to_string(),
            Raw::Bool(value) => value.to_string(),
            Raw::Text(value) => value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn defaults() {
        let settings = AdaptiveSettings::default();
        assert_eq!(
            settings,
            AdaptiveSettings {
                max_telemetries_per_second: 100.0,
                evaluation_interval: Duration::from_secs(900),
                sampling_percentage_decrease_timeout: Duration::from_secs(120),
                sampling_percentage_increase_timeout: Duration::from_secs(900),
                min_sampling_percentage: 1.0,
                max_sampling_percentage: 100.0,
                initial_sampling_percentage: 100.0,
                moving_average_ratio: 0.25,
            }
        );
    }

    #[test]
    fn parses_and_clamps() {
        let settings = AdaptiveSettings::from_options(&AdaptiveSamplingOptions {
            max_telemetries_per_second: some("10"),
            evaluation_interval_in_seconds: some(" 1 "),
            sampling_percentage_decrease_timeout_in_seconds: some("not a number"),
            sampling_percentage_increase_timeout_in_seconds: some("-5"),
            min_sampling_percentage: some("0"),
            max_sampling_percentage: some("250"),
            initial_sampling_percentage: some("12.5"),
            moving_average_ratio: some("0.5"),
        });

        assert_eq!(settings.max_telemetries_per_second, 10.0);
        assert_eq!(settings.evaluation_interval, Duration::from_secs(1));
        assert_eq!(
            settings.sampling_percentage_decrease_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(
            settings.sampling_percentage_increase_timeout,
            Duration::from_secs(900)
        );
        // zero is not a usable value, so the default applies
        assert_eq!(settings.min_sampling_percentage, 1.0);
        assert_eq!(settings.max_sampling_percentage, 100.0);
        assert_eq!(settings.initial_sampling_percentage, 12.5);
        assert_eq!(settings.moving_average_ratio, 0.5);
    }

    #[test]
    fn fractional_integers_fall_back() {
        let settings = AdaptiveSettings::from_options(&AdaptiveSamplingOptions {
            max_telemetries_per_second: some("1.5"),
            ..Default::default()
        });
        assert_eq!(settings.max_telemetries_per_second, 100.0);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn deserializes_numbers_and_strings() {
        let options: AdaptiveSamplingOptions = serde_yaml::from_str(
            "max_telemetries_per_second: 10\nevaluation_interval_in_seconds: \"2\"\nmoving_average_ratio: 0.5\n",
        )
        .unwrap();
        assert_eq!(
            options,
            AdaptiveSamplingOptions {
                max_telemetries_per_second: some("10"),
                evaluation_interval_in_seconds: some("2"),
                moving_average_ratio: some("0.5"),
                ..Default::default()
            }
        );
    }
}
