use std::fs::File;

use anyhow::Error;
use serde::Deserialize;

use crate::quickpulse::DEFAULT_MAX_DOCUMENTS;
use crate::sampling::overrides::SamplingOverrideConfig;
use crate::sampling::AdaptiveSamplingOptions;

#[derive(Debug, Deserialize, PartialEq)]
pub struct Config {
    pub middlewares: Vec<MiddlewareConfig>,
}

impl Config {
    pub fn new(path: &str) -> Result<Self, Error> {
        let f = File::open(path)?;
        let d: Config = serde_yaml::from_reader(f)?;
        Ok(d)
    }
}

/// One step of the chain, in the order items flow through them.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MiddlewareConfig {
    LiveMetrics(LiveMetricsConfig),
    FixedRateSample(FixedRateSampleConfig),
    AdaptiveSample(AdaptiveSampleConfig),
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LiveMetricsConfig {
    pub instrumentation_key: String,
    #[serde(default = "default_publish_interval")]
    pub publish_interval: u64, // in seconds
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

fn default_publish_interval() -> u64 {
    1
}

fn default_max_documents() -> usize {
    DEFAULT_MAX_DOCUMENTS
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct FixedRateSampleConfig {
    pub sampling_percentage: f64,
    #[serde(default)]
    pub exclude_types: String,
    #[serde(default)]
    pub include_types: String,
    #[serde(default)]
    pub overrides: Vec<SamplingOverrideConfig>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct AdaptiveSampleConfig {
    #[serde(flatten)]
    pub options: AdaptiveSamplingOptions,
    #[serde(default)]
    pub exclude_types: String,
    #[serde(default)]
    pub include_types: String,
    #[serde(default)]
    pub overrides: Vec<SamplingOverrideConfig>,
}
