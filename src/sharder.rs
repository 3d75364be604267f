//! Deterministic mapping of strings to shards.
//!
//! The byte-level procedure here is shared by every Eppo client: independently implemented clients
//! must agree on the shard for the same input.

pub trait Sharder {
    /// Map `input` to a shard in `[0, total_shards)`. Returns 0 when `total_shards` is 0.
    fn get_shard(&self, input: &str, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
///
/// Takes the first 4 bytes of the MD5 digest of `input` as a big-endian `u32` and reduces it
/// modulo `total_shards`.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as u64).checked_rem(total_shards).unwrap_or(0)
    }
}

/// Input used for exposure sampling of `subject_key` in `experiment_key`.
pub(crate) fn exposure_input(subject_key: &str, experiment_key: &str) -> String {
    format!("exposure-{}-{}", subject_key, experiment_key)
}

/// Input used for variation selection of `subject_key` in `experiment_key`.
pub(crate) fn assignment_input(subject_key: &str, experiment_key: &str) -> String {
    format!("assignment-{}-{}", subject_key, experiment_key)
}

/// Hex-encoded MD5 digest of the subject key. Overrides are keyed by this value so that raw
/// subject keys never appear in configuration.
pub fn hash_subject_key(subject_key: &str) -> String {
    format!("{:x}", md5::compute(subject_key))
}

#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<String, u64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        self.0.get(input).copied().unwrap_or(0) % total_shards
    }
}
