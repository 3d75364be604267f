use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    rules::Rule,
    shard_range::{partition_shard_ranges, validate_shard_ranges, ShardRange},
};

/// Randomized Assignment Configuration, as returned by the server.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomizedAssignmentConfig {
    pub flags: HashMap<String, TryParse<ExperimentConfiguration>>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfiguration {
    pub name: String,
    pub enabled: bool,
    #[serde(default = "default_subject_shards")]
    pub subject_shards: u64,
    /// Maps MD5 hex digest of the subject key to the forced variation value.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub allocations: HashMap<String, Allocation>,
}

fn default_subject_shards() -> u64 {
    10_000
}

impl ExperimentConfiguration {
    /// Keys of allocations whose variations do not partition the shard space, plus rule allocation
    /// keys that point to nothing.
    pub(crate) fn invalid_allocations(&self) -> Vec<&str> {
        let broken_ranges = self
            .allocations
            .iter()
            .filter(|(_, allocation)| !allocation.is_valid(self.subject_shards))
            .map(|(key, _)| key.as_str());
        let dangling_rules = self
            .rules
            .iter()
            .filter(|rule| !self.allocations.contains_key(&rule.allocation_key))
            .map(|rule| rule.allocation_key.as_str());
        broken_ranges.chain(dangling_rules).collect()
    }
}

/// A traffic slice of an experiment.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Fraction (0 to 1) of subjects exposed to the experiment.
    pub percent_exposure: f64,
    pub variations: Vec<Variation>,
}

impl Allocation {
    /// Build an allocation that splits `subject_shards` evenly across `variations` (name, value),
    /// in order.
    pub fn with_even_split(
        percent_exposure: f64,
        variations: &[(&str, &str)],
        subject_shards: u64,
    ) -> Allocation {
        let ranges = partition_shard_ranges(variations.len(), subject_shards);
        Allocation {
            percent_exposure,
            variations: variations
                .iter()
                .zip(ranges)
                .map(|(&(name, value), shard_range)| Variation {
                    name: name.to_owned(),
                    value: value.to_owned(),
                    shard_range,
                })
                .collect(),
        }
    }

    pub fn is_valid(&self, subject_shards: u64) -> bool {
        (0.0..=1.0).contains(&self.percent_exposure)
            && validate_shard_ranges(
                self.variations.iter().map(|v| &v.shard_range),
                subject_shards,
            )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub name: String,
    pub value: String,
    pub shard_range: ShardRange,
}
