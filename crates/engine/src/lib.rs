//! Log-compaction engine for replicated key-value workloads.
//!
//! Replicas append a totally-ordered command stream; the engine discards
//! commands whose effects are overwritten by later writes while preserving
//! the externally observable final state over any requested index interval.
//! Recovering replicas replay the compacted log instead of the full
//! history.
//!
//! Five structures implement the [`Structure`] contract, differing in their
//! primary container and reduce strategy:
//!
//! - [`ListHt`] — singly linked list, two-pointer midpoint search
//! - [`ArrayHt`] — dynamic array, binary search
//! - [`AvlTreeHt`] — self-balancing search tree with greedy, BFS, and DFS
//!   reducers
//! - [`CircBuffHt`] — fixed-capacity ring with off-thread reduce
//! - [`ConcTable`] — rotating multi-view table with asynchronous
//!   persistence; the core variant
//!
//! The [`recovery`] module reassembles the persisted segment catalog for
//! full-history recovery.

use std::fmt;

mod array;
mod avl;
mod circbuff;
mod conctable;
mod list;
mod log_data;
mod measure;
mod reduce;
pub mod recovery;
mod schedule;
mod table;

pub use array::ArrayHt;
pub use avl::AvlTreeHt;
pub use circbuff::CircBuffHt;
pub use conctable::ConcTable;
pub use list::ListHt;

// Re-export the foundation types alongside the structures
pub use minlog_types::{
    codec, Command, LogConfig, MinStateTable, MinlogError, Op, ReduceInterval, Reducer, Result,
    State,
};

/// Capability set shared by every log structure.
///
/// `log` must be driven by a single producer with strictly non-decreasing
/// command ids; the recovery operations are safe to call from concurrent
/// reader threads. The `Display` implementation renders a debug view of the
/// underlying container.
pub trait Structure: fmt::Display + Send + Sync {
    /// Absorbs one command, possibly triggering (or enqueuing) a reduce
    /// pass per the configured schedule.
    fn log(&self, cmd: Command) -> Result<()>;

    /// Number of entries in the primary container. Schedules that reset
    /// state (`Immediately`, `Interval`) shrink this over time.
    fn len(&self) -> u64;

    /// Whether the primary container holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the compacted command log covering `[p, n]`, triggering a
    /// lazy reduce when the schedule has not produced one yet.
    fn recov(&self, p: u64, n: u64) -> Result<Vec<Command>>;

    /// Returns the compacted log as serialized bytes, skipping the decode
    /// round-trip on persistent configurations.
    fn recov_bytes(&self, p: u64, n: u64) -> Result<Vec<u8>>;
}
