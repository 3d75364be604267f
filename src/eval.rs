use chrono::Utc;

use crate::{
    rac::{Allocation, ExperimentConfiguration, Variation},
    rules::find_matching_rule,
    sharder::{assignment_input, exposure_input, hash_subject_key, Sharder},
    AssignmentEvent, Result, SubjectAttributes,
};

impl ExperimentConfiguration {
    /// Resolve the variation value for `subject_key`.
    ///
    /// Returns `Ok(None)` when the subject is not assigned. The returned event is `None` for
    /// overridden subjects, which are not logged.
    pub fn eval(
        &self,
        experiment_key: &str,
        subject_key: &str,
        subject_attributes: &SubjectAttributes,
        sharder: &impl Sharder,
    ) -> Result<Option<(String, Option<AssignmentEvent>)>> {
        if let Some(value) = self.overrides.get(&hash_subject_key(subject_key)) {
            return Ok(Some((value.clone(), None)));
        }

        if !self.enabled {
            return Ok(None);
        }

        let Some(rule) = find_matching_rule(subject_attributes, &self.rules)? else {
            return Ok(None);
        };

        let Some(allocation) = self.allocations.get(&rule.allocation_key) else {
            log::warn!(target: "eppo",
                       experiment_key,
                       allocation_key:display = rule.allocation_key;
                       "internal: rule references unknown allocation");
            return Ok(None);
        };

        if self.subject_shards == 0 {
            log::warn!(target: "eppo", experiment_key; "internal: experiment has no subject shards");
            return Ok(None);
        }

        if !allocation.is_in_sample(experiment_key, subject_key, sharder, self.subject_shards) {
            return Ok(None);
        }

        let Some(variation) =
            allocation.get_variation(experiment_key, subject_key, sharder, self.subject_shards)
        else {
            log::warn!(target: "eppo",
                       experiment_key,
                       subject_key,
                       allocation_key:display = rule.allocation_key;
                       "internal: no variation covers the assignment shard");
            return Ok(None);
        };

        let event = AssignmentEvent {
            experiment: experiment_key.to_owned(),
            variation: variation.value.clone(),
            subject: subject_key.to_owned(),
            subject_attributes: subject_attributes.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };

        Ok(Some((variation.value.clone(), Some(event))))
    }
}

impl Allocation {
    fn is_in_sample(
        &self,
        experiment_key: &str,
        subject_key: &str,
        sharder: &impl Sharder,
        subject_shards: u64,
    ) -> bool {
        let shard = sharder.get_shard(&exposure_input(subject_key, experiment_key), subject_shards);
        shard as f64 <= self.percent_exposure * subject_shards as f64
    }

    fn get_variation(
        &self,
        experiment_key: &str,
        subject_key: &str,
        sharder: &impl Sharder,
        subject_shards: u64,
    ) -> Option<&Variation> {
        let shard =
            sharder.get_shard(&assignment_input(subject_key, experiment_key), subject_shards);
        self.variations
            .iter()
            .find(|variation| variation.shard_range.contains(shard))
    }
}
