//! Dynamic-array log structure.
//!
//! The simplest single-writer variant: entries append to a `Vec` (amortized
//! O(1)) and the reduce walk locates its starting point with an ordinary
//! binary search over the strictly increasing indices.

use std::fmt;

use minlog_types::error::{EmptyStructureSnafu, InvalidIntervalSnafu, UnsupportedSnafu};
use minlog_types::{Command, LogConfig, Reducer, Result, State};
use parking_lot::RwLock;
use snafu::ensure;

use crate::log_data::LogData;
use crate::reduce;
use crate::schedule;
use crate::table::{Entry, StateTable};
use crate::Structure;

/// Pre-sized entry capacity for interval configs with short periods.
const MIN_ENTRY_CAPACITY: u32 = 1000;

pub(crate) struct ArrayInner {
    pub entries: Vec<Entry>,
    pub table: StateTable,
    pub data: LogData,
}

/// Log structure backed by a dynamic array of entries.
pub struct ArrayHt {
    inner: RwLock<ArrayInner>,
}

impl ArrayHt {
    /// Creates an array structure with the default configuration.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ArrayInner::new(LogConfig::default())),
        }
    }

    /// Creates an array structure with a validated configuration.
    ///
    /// The entry array is pre-sized to two reduce periods so interval
    /// schedules rarely reallocate mid-epoch.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` violates the cross-field
    /// rules.
    pub fn with_config(config: LogConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.period.max(MIN_ENTRY_CAPACITY) as usize * 2;
        let mut inner = ArrayInner::new(config);
        inner.entries.reserve(capacity);
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Runs a reduce pass with an explicit algorithm over `[p, n]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` when `n < p`, `EmptyStructure` when nothing
    /// was logged, and `Unsupported` for non-array algorithms.
    pub fn reduce_with(&self, alg: Reducer, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let inner = self.inner.read();
        ensure!(!inner.entries.is_empty(), EmptyStructureSnafu);
        match alg {
            Reducer::GreedyArray => Ok(reduce::greedy_array(&inner, p, n)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "array",
            }
            .fail(),
        }
    }
}

impl Default for ArrayHt {
    fn default() -> Self {
        Self::new()
    }
}

impl Structure for ArrayHt {
    fn log(&self, cmd: Command) -> Result<()> {
        let mut inner = self.inner.write();
        inner.data.observe(cmd.id);

        let is_write = cmd.is_write();
        if is_write {
            let state_at = inner.table.append(
                &cmd.key,
                State {
                    ind: cmd.id,
                    cmd: cmd.clone(),
                },
            );
            inner.entries.push(Entry {
                ind: cmd.id,
                key: cmd.key,
                state_at,
            });
        }

        let (tick, period) = (inner.data.config.tick, inner.data.config.period);
        let action = schedule::next_action(tick, is_write, &mut inner.data.count, period);
        if action.reduce {
            let (first, last) = (inner.data.first, inner.data.last);
            inner.reduce_log(first, last)?;
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.inner.read().entries.len() as u64
    }

    fn recov(&self, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let mut inner = self.inner.write();
        inner.may_execute_lazy_reduce(p, n)?;
        inner.data.retrieve_log()
    }

    fn recov_bytes(&self, p: u64, n: u64) -> Result<Vec<u8>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let mut inner = self.inner.write();
        inner.may_execute_lazy_reduce(p, n)?;
        inner.data.retrieve_raw_log(p, n)
    }
}

impl fmt::Display for ArrayHt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        for entry in &inner.entries {
            write!(f, "({}|{}) -> ", entry.ind, entry.key)?;
        }
        Ok(())
    }
}

impl ArrayInner {
    fn new(config: LogConfig) -> Self {
        Self {
            entries: Vec::new(),
            table: StateTable::new(),
            data: LogData::new(config),
        }
    }

    fn reduce_log(&mut self, p: u64, n: u64) -> Result<()> {
        let cmds = self.run_reducer(p, n)?;
        self.data.update_log_state(&cmds, p, n, false)
    }

    fn run_reducer(&self, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(!self.entries.is_empty(), EmptyStructureSnafu);
        match self.data.config.alg {
            Reducer::GreedyArray => Ok(reduce::greedy_array(self, p, n)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "array",
            }
            .fail(),
        }
    }

    fn may_execute_lazy_reduce(&mut self, p: u64, n: u64) -> Result<()> {
        match self.data.config.tick {
            minlog_types::ReduceInterval::Delayed => self.reduce_log(p, n),
            minlog_types::ReduceInterval::Interval if !self.data.first_reduce_exists() => {
                let (first, last) = (self.data.first, self.data.last);
                self.reduce_log(first, last)
            }
            _ => Ok(()),
        }
    }
}
