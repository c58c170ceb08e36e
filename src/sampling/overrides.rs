//! Attribute-based sampling percentage overrides.
//!
//! Each override is a list of attribute predicates plus a percentage. The first override whose
//! predicates all match an item decides the percentage that item is sampled at.

use regex::Regex;

use crate::types::TelemetryItem;

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchType {
    Strict,
    Regexp,
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct OverrideAttributeConfig {
    pub key: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<String>,
    /// Without a match type, the override only requires the key to be present.
    #[cfg_attr(feature = "serde", serde(default))]
    pub match_type: Option<MatchType>,
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingOverrideConfig {
    pub attributes: Vec<OverrideAttributeConfig>,
    pub percentage: f64,
}

#[derive(Debug)]
enum Predicate {
    Strict { key: String, value: String },
    Regexp { key: String, pattern: Regex },
    KeyOnly { key: String },
}

impl Predicate {
    fn new(config: &OverrideAttributeConfig) -> Result<Self, String> {
        let key = config.key.clone();
        match (config.match_type, &config.value) {
            (None, _) => Ok(Predicate::KeyOnly { key }),
            (Some(MatchType::Strict), Some(value)) => Ok(Predicate::Strict {
                key,
                value: value.clone(),
            }),
            (Some(MatchType::Regexp), Some(value)) => Regex::new(&format!("^(?:{value})$"))
                .map(|pattern| Predicate::Regexp { key, pattern })
                .map_err(|e| format!("invalid pattern for {:?}: {e}", config.key)),
            (Some(match_type), None) => Err(format!(
                "{match_type:?} match on {:?} needs a value",
                config.key
            )),
        }
    }

    fn test(&self, item: &TelemetryItem) -> bool {
        match self {
            Predicate::Strict { key, value } => item.attributes.get(key) == Some(value),
            Predicate::Regexp { key, pattern } => item
                .attributes
                .get(key)
                .is_some_and(|value| pattern.is_match(value)),
            Predicate::KeyOnly { key } => item.attributes.contains_key(key),
        }
    }
}

#[derive(Debug)]
struct MatcherGroup {
    predicates: Vec<Predicate>,
    percentage: f64,
}

#[derive(Debug, Default)]
pub struct SamplingOverrides {
    groups: Vec<MatcherGroup>,
}

impl SamplingOverrides {
    /// Builds the matchers. Overrides with an invalid predicate are logged and skipped so that
    /// a bad entry never stops telemetry from flowing.
    pub fn new(configs: &[SamplingOverrideConfig]) -> Self {
        let mut groups = Vec::with_capacity(configs.len());
        for config in configs {
            let predicates: Result<Vec<_>, _> =
                config.attributes.iter().map(Predicate::new).collect();
            match predicates {
                Ok(predicates) => groups.push(MatcherGroup {
                    predicates,
                    percentage: config.percentage.clamp(0.0, 100.0),
                }),
                Err(e) => log::warn!("ignoring sampling override: {e}"),
            }
        }
        SamplingOverrides { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn percentage_for(&self, item: &TelemetryItem) -> Option<f64> {
        self.groups
            .iter()
            .find(|group| group.predicates.iter().all(|p| p.test(item)))
            .map(|group| group.percentage)
    }
}
