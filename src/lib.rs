//! Randomized assignment client for Eppo experiments.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that assigns `subjects` to experiment variations. Each
//! subject has a unique key and optional key-value attributes used by targeting rules. Assignment
//! is computed locally and deterministically from configuration held in memory: the same subject
//! gets the same variation in every process that holds the same configuration.
//!
//! Configuration is fetched by a [`PollerThread`] (see [`Client::start_poller_thread`]), which
//! refreshes it periodically and retries failed refreshes with exponential backoff.
//!
//! An [`AssignmentLogger`] should be provided to save assignment events to your storage,
//! facilitating tracking of which subject received which variation.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Assignment fails with [`Error::InvalidArgument`] for blank keys or targeting rules that cannot
//! be applied to the subject attributes, and with [`Error::Unauthorized`] once the server has
//! rejected the API key. Transient network errors never reach the caller; the last successfully
//! fetched configuration keeps being used.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `eppo` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into client operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod assignment_logger;
mod client;
mod config;
mod configuration_requestor;
mod configuration_store;
mod error;
mod eval;
mod poller;
mod rac;
mod rules;
mod shard_range;
mod sharder;
mod transport;

pub use assignment_logger::{AssignmentEvent, AssignmentLogger, AssignmentLoggerError};
pub use client::{AttributeValue, Client, SubjectAttributes};
pub use config::ClientConfig;
pub use configuration_requestor::ConfigurationRequestor;
pub use configuration_store::ConfigurationStore;
pub use error::{Error, Result};
pub use poller::{PollerConfig, PollerState, PollerThread};
pub use rac::{Allocation, ExperimentConfiguration, RandomizedAssignmentConfig, TryParse, Variation};
pub use rules::{
    find_matching_rule, matches_any_rule, Condition, ConditionValue, Operator, Rule, RuleType,
};
pub use shard_range::{partition_shard_ranges, validate_shard_ranges, ShardRange};
pub use sharder::{hash_subject_key, Md5Sharder, Sharder};
pub use transport::{HttpTransport, Transport};
