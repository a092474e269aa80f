//! The command and state model.
//!
//! A replica appends a totally-ordered stream of [`Command`]s indexed by a
//! consensus sequence number. Only SET commands mutate key-value state; GET
//! commands advance the observed upper bound but are never retained by a
//! reduce pass.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Operation carried by a [`Command`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// Write: assigns `value` to `key`.
    Set,
    /// Read: observes `key` without mutating state.
    #[default]
    Get,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Set => write!(f, "SET"),
            Op::Get => write!(f, "GET"),
        }
    }
}

/// A single key-value command delivered by the ordering layer.
///
/// `id` is the monotonic consensus index assigned by the upstream producer.
/// The engine requires strictly non-decreasing ids from a single producer
/// thread; the structures reject duplicates where they can detect them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Monotonic consensus index.
    pub id: u64,
    /// SET or GET.
    pub op: Op,
    /// Target key.
    pub key: String,
    /// Payload for SET commands; empty for GETs.
    pub value: String,
}

impl Command {
    /// Returns `true` for commands that mutate state.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.op == Op::Set
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {}={})", self.id, self.op, self.key, self.value)
    }
}

/// The state produced by applying a command at a given consensus index.
///
/// Used as the per-key payload in update histories: for every key the engine
/// tracks the sequence of states it moved through, each tagged with the
/// index that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Consensus index at which `cmd` was applied.
    pub ind: u64,
    /// The command that produced this state.
    pub cmd: Command,
}

/// Minimal per-key table keeping only the latest state for each key.
///
/// The ring-buffer and concurrent-table structures maintain one of these per
/// view; the table itself *is* the reduced form of the commands it absorbed.
pub type MinStateTable = HashMap<String, State>;
