//! Linked-list log structure.
//!
//! Entries live in an arena-backed singly linked list (head and tail
//! handles); midpoint lookups for the reduce walk use the classic
//! two-pointer traversal, giving O(log n) binary search without random
//! access.

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

pub(crate) struct ListNode {
    pub entry: Entry,
    pub next: Option<usize>,
}

pub(crate) struct ListInner {
    nodes: Vec<ListNode>,
    head: Option<usize>,
    tail: Option<usize>,
    pub table: StateTable,
    pub data: LogData,
}

/// Log structure backed by a singly linked list of entries.
pub struct ListHt {
    inner: RwLock<ListInner>,
}

impl ListHt {
    /// Creates a list structure with the default configuration.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ListInner::new(LogConfig::default())),
        }
    }

    /// Creates a list structure with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` violates the cross-field
    /// rules.
    pub fn with_config(config: LogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: RwLock::new(ListInner::new(config)),
        })
    }

    /// Runs a reduce pass with an explicit algorithm over `[p, n]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` when `n < p`, `EmptyStructure` when nothing
    /// was logged, and `Unsupported` for non-list algorithms.
    pub fn reduce_with(&self, alg: Reducer, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let inner = self.inner.read();
        ensure!(!inner.nodes.is_empty(), EmptyStructureSnafu);
        match alg {
            Reducer::GreedyList => Ok(reduce::greedy_list(&inner, p, n)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "list",
            }
            .fail(),
        }
    }
}

impl Default for ListHt {
    fn default() -> Self {
        Self::new()
    }
}

impl Structure for ListHt {
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
            inner.push_entry(Entry {
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
        self.inner.read().nodes.len() as u64
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

impl fmt::Display for ListHt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut node = inner.head;
        while let Some(at) = node {
            let current = inner.node(at);
            write!(f, "({}|{}) -> ", current.entry.ind, current.entry.key)?;
            node = current.next;
        }
        Ok(())
    }
}

impl ListInner {
    fn new(config: LogConfig) -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            table: StateTable::new(),
            data: LogData::new(config),
        }
    }

    pub(crate) fn node(&self, at: usize) -> &ListNode {
        &self.nodes[at]
    }

    fn push_entry(&mut self, entry: Entry) {
        let at = self.nodes.len();
        self.nodes.push(ListNode { entry, next: None });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(at),
            None => self.head = Some(at),
        }
        self.tail = Some(at);
    }

    /// Two-pointer binary search for the first entry at index >= `ind`;
    /// returns the nearest node when no exact match exists.
    pub(crate) fn search_entry_at_or_after(&self, ind: u64) -> Option<usize> {
        let mut start = self.head?;
        let mut last = self.tail?;
        loop {
            if start == last {
                return Some(start);
            }
            let mid = self.find_mid(start, last);
            let entry = &self.node(mid).entry;
            if entry.ind == ind {
                return Some(mid);
            }
            if ind > entry.ind {
                match self.node(mid).next {
                    Some(next) => start = next,
                    None => return Some(mid),
                }
            } else {
                last = mid;
            }
        }
    }

    /// Tortoise-and-hare midpoint between two nodes of the list.
    fn find_mid(&self, start: usize, last: usize) -> usize {
        let mut slow = start;
        let mut fast = start;
        while fast != last {
            let Some(step) = self.node(fast).next else {
                break;
            };
            fast = step;
            if fast == last {
                break;
            }
            let Some(step) = self.node(fast).next else {
                break;
            };
            fast = step;
            if let Some(next) = self.node(slow).next {
                slow = next;
            }
        }
        slow
    }

    fn reduce_log(&mut self, p: u64, n: u64) -> Result<()> {
        let cmds = self.run_reducer(p, n)?;
        self.data.update_log_state(&cmds, p, n, false)
    }

    fn run_reducer(&self, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(!self.nodes.is_empty(), EmptyStructureSnafu);
        match self.data.config.alg {
            Reducer::GreedyList => Ok(reduce::greedy_list(self, p, n)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "list",
            }
            .fail(),
        }
    }

    fn may_execute_lazy_reduce(&mut self, p: u64, n: u64) -> Result<()> {
        match self.data.config.tick {
            minlog_types::ReduceInterval::Delayed => self.reduce_log(p, n),
            minlog_types::ReduceInterval::Interval if !self.data.first_reduce_exists() => {
                // reduce the full extents; a partial interval would be
                // incoherent with the interval schedule
                let (first, last) = (self.data.first, self.data.last);
                self.reduce_log(first, last)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use minlog_types::Op;

    use super::*;

    fn set(id: u64, key: &str, value: &str) -> Command {
        Command {
            id,
            op: Op::Set,
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn get(id: u64, key: &str) -> Command {
        Command {
            id,
            op: Op::Get,
            key: key.to_string(),
            value: String::new(),
        }
    }

    #[test]
    fn test_log_appends_writes_only() {
        let lt = ListHt::new();
        lt.log(set(1, "a", "1")).expect("set");
        lt.log(get(2, "a")).expect("get");
        lt.log(set(3, "b", "2")).expect("set");
        assert_eq!(lt.len(), 2);

        let inner = lt.inner.read();
        assert_eq!((inner.data.first, inner.data.last), (1, 3));
    }

    #[test]
    fn test_first_set_by_leading_get() {
        let lt = ListHt::new();
        lt.log(get(4, "a")).expect("get");
        lt.log(set(5, "a", "1")).expect("set");
        let inner = lt.inner.read();
        assert_eq!(inner.data.first, 4);
        assert_eq!(inner.data.last, 5);
    }

    #[test]
    fn test_midpoint_search_finds_nearest() {
        let lt = ListHt::new();
        for id in [2u64, 4, 6, 8, 10] {
            lt.log(set(id, &id.to_string(), "v")).expect("set");
        }
        let inner = lt.inner.read();
        for (wanted, expected) in [(4u64, 4u64), (5, 6), (10, 10), (1, 2)] {
            let at = inner.search_entry_at_or_after(wanted).expect("found");
            let ind = inner.node(at).entry.ind;
            assert!(
                ind == expected || ind == wanted,
                "searched {wanted}, landed on {ind}"
            );
        }
    }

    #[test]
    fn test_reduce_scenario_keeps_last_writes() {
        let lt = ListHt::new();
        lt.log(set(1, "a", "1")).expect("set");
        lt.log(set(2, "a", "2")).expect("set");
        lt.log(set(3, "b", "3")).expect("set");
        lt.log(get(4, "a")).expect("get");

        let out = lt.reduce_with(Reducer::GreedyList, 1, 4).expect("reduce");
        assert_eq!(out.len(), 2);
        let mut kv: Vec<(String, String)> =
            out.iter().map(|c| (c.key.clone(), c.value.clone())).collect();
        kv.sort();
        assert_eq!(
            kv,
            vec![
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_reduce_rejects_bad_inputs() {
        let lt = ListHt::new();
        let err = lt.reduce_with(Reducer::GreedyList, 3, 1).expect_err("n < p");
        assert!(matches!(
            err,
            minlog_types::MinlogError::InvalidInterval { .. }
        ));

        let err = lt
            .reduce_with(Reducer::GreedyList, 0, 1)
            .expect_err("empty structure");
        assert!(matches!(err, minlog_types::MinlogError::EmptyStructure));

        lt.log(set(1, "a", "1")).expect("set");
        let err = lt
            .reduce_with(Reducer::GreedyAvl, 0, 1)
            .expect_err("algorithm mismatch");
        assert!(matches!(err, minlog_types::MinlogError::Unsupported { .. }));
    }

    #[test]
    fn test_interval_out_of_range_is_empty() {
        let lt = ListHt::new();
        lt.log(set(5, "a", "1")).expect("set");
        let out = lt.reduce_with(Reducer::GreedyList, 10, 20).expect("reduce");
        assert!(out.is_empty());
    }

    #[test]
    fn test_delayed_recov_reduces_on_demand() {
        let lt = ListHt::with_config(
            LogConfig::builder()
                .alg(Reducer::GreedyList)
                .build()
                .expect("config"),
        )
        .expect("structure");

        for id in 1..=10u64 {
            lt.log(set(id, &format!("k{}", id % 3), &id.to_string()))
                .expect("set");
        }
        let out = lt.recov(1, 10).expect("recov");
        assert_eq!(out.len(), 3, "one command per distinct key");
    }
}
