//! Reduce scheduling.
//!
//! The schedule decides, for each logged command, whether a reduce pass must
//! be triggered and whether the concurrent table has to rotate its current
//! view. The decision is a pure function of the configured tick, the
//! command kind, and the per-structure (or per-view) command counter.

use minlog_types::ReduceInterval;

/// Outcome of observing one command against the reduce schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReduceAction {
    /// A reduce pass must run for the structure (or view) that absorbed the
    /// command.
    pub reduce: bool,
    /// The concurrent table must advance its current-view cursor before the
    /// command lands. Single-view structures ignore this.
    pub advance: bool,
}

impl ReduceAction {
    const NONE: ReduceAction = ReduceAction {
        reduce: false,
        advance: false,
    };
}

/// Observes one command and returns the scheduling decision.
///
/// `count` is the caller-owned counter of commands seen since the last
/// interval trigger; it is advanced (and wrapped) here so the rules stay in
/// one place:
///
/// - `Immediately`: every write reduces in place, reads never do; no
///   rotation.
/// - `Delayed`: never reduces on the log path.
/// - `Interval`: every command (read or write) advances the counter; hitting
///   `period` resets it and reduces with rotation.
pub(crate) fn next_action(
    tick: ReduceInterval,
    is_write: bool,
    count: &mut u32,
    period: u32,
) -> ReduceAction {
    match tick {
        ReduceInterval::Immediately => ReduceAction {
            reduce: is_write,
            advance: false,
        },
        ReduceInterval::Delayed => ReduceAction::NONE,
        ReduceInterval::Interval => {
            *count += 1;
            if *count >= period {
                *count = 0;
                ReduceAction {
                    reduce: true,
                    advance: true,
                }
            } else {
                ReduceAction::NONE
            }
        }
    }
}
