//! Log configuration.
//!
//! A [`LogConfig`] selects the reduce algorithm, the reduce schedule, and the
//! persistence mode for a log structure. Configs deserialize from TOML or
//! JSON with per-field defaults and validate cross-field constraints either
//! through the fallible builder or via [`validate`](LogConfig::validate)
//! after deserialization.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Configuration validation error.
///
/// Returned when a configuration value violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// When the reduce pass runs relative to the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceInterval {
    /// Every SET triggers a reduce; reads only advance the upper bound.
    Immediately,
    /// Reduce runs only when a recovery caller asks for data.
    Delayed,
    /// A counter of logged commands triggers a reduce every `period` events.
    Interval,
}

/// The reduce algorithm to apply over a structure.
///
/// Each variant is bound to one structure family; configuring a mismatched
/// algorithm surfaces as an `Unsupported` error when the reduce runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    /// Greedy walk over the linked-list structure.
    GreedyList,
    /// Greedy walk over the array structure.
    GreedyArray,
    /// Recursive greedy descent over the AVL structure.
    GreedyAvl,
    /// Iterative breadth-first variant over the AVL structure.
    IterBfsAvl,
    /// Iterative depth-first variant over the AVL structure.
    IterDfsAvl,
    /// Newest-to-oldest walk over a ring-buffer snapshot.
    IterCircBuff,
    /// Direct dump of a concurrent-table view; the view is the reduced form.
    IterConcTable,
}

/// Configuration for a log structure.
///
/// # Validation Rules
///
/// - `inmem == false` requires a non-empty `fname`
/// - `tick == Interval` requires `period > 0`
/// - `parallel_io` requires `second_fname`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Reduce algorithm applied over the structure.
    #[serde(default = "default_alg")]
    pub alg: Reducer,
    /// Reduce schedule.
    #[serde(default = "default_tick")]
    pub tick: ReduceInterval,
    /// Keep the compacted log in memory only; no file persistence.
    #[serde(default = "default_inmem")]
    pub inmem: bool,
    /// Write each reduce to a new `<stem>.<last>.log` segment instead of
    /// overwriting a single file.
    #[serde(default)]
    pub keep_all: bool,
    /// Durable flush (fsync) on every persisted reduce.
    #[serde(default)]
    pub sync: bool,
    /// Capture latency tuples for persistence events.
    #[serde(default)]
    pub measure: bool,
    /// Reduce trigger interval; required when `tick == Interval`.
    #[serde(default)]
    pub period: u32,
    /// Primary log path; required when `inmem == false`.
    #[serde(default)]
    pub fname: PathBuf,
    /// Mirror alternating reduces onto a second persistence worker.
    #[serde(default)]
    pub parallel_io: bool,
    /// Secondary log path; required when `parallel_io` is set.
    #[serde(default)]
    pub second_fname: Option<PathBuf>,
}

fn default_alg() -> Reducer {
    Reducer::IterDfsAvl
}

fn default_tick() -> ReduceInterval {
    ReduceInterval::Delayed
}

fn default_inmem() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            alg: default_alg(),
            tick: default_tick(),
            inmem: default_inmem(),
            keep_all: false,
            sync: false,
            measure: false,
            period: 0,
            fname: PathBuf::new(),
            parallel_io: false,
            second_fname: None,
        }
    }
}

#[bon::bon]
impl LogConfig {
    /// Creates a new log configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `inmem` is false and no `fname` was given
    /// - `tick` is `Interval` and `period` is 0
    /// - `parallel_io` is set without a `second_fname`
    #[builder]
    pub fn new(
        #[builder(default = default_alg())] alg: Reducer,
        #[builder(default = default_tick())] tick: ReduceInterval,
        #[builder(default = default_inmem())] inmem: bool,
        #[builder(default)] keep_all: bool,
        #[builder(default)] sync: bool,
        #[builder(default)] measure: bool,
        #[builder(default)] period: u32,
        #[builder(default, into)] fname: PathBuf,
        #[builder(default)] parallel_io: bool,
        second_fname: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            alg,
            tick,
            inmem,
            keep_all,
            sync,
            measure,
            period,
            fname,
            parallel_io,
            second_fname,
        };
        config.validate()?;
        Ok(config)
    }
}

impl LogConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to enforce the cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on any violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.inmem && self.fname.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "persistent config requires a log path (fname)".to_string(),
            });
        }
        if self.tick == ReduceInterval::Interval && self.period == 0 {
            return Err(ConfigError::Validation {
                message: "interval schedule requires period > 0".to_string(),
            });
        }
        if self.parallel_io && self.second_fname.is_none() {
            return Err(ConfigError::Validation {
                message: "parallel IO requires a secondary log path (second_fname)".to_string(),
            });
        }
        Ok(())
    }
}
