//! AVL-tree log structure.
//!
//! Entries form a self-balancing BST keyed by consensus index, stored in an
//! arena with integer handles instead of owned child pointers. Insertion is
//! the classical recursive algorithm with the four rotation cases; since
//! indices are strictly monotonic under a correct producer, a duplicate
//! insert is a contract violation and is rejected.

use std::fmt;

use minlog_types::error::{
    DuplicateIndexSnafu, EmptyStructureSnafu, InvalidIntervalSnafu, UnsupportedSnafu,
};
use minlog_types::{Command, LogConfig, Reducer, Result, State};
use parking_lot::RwLock;
use snafu::ensure;

use crate::log_data::LogData;
use crate::reduce;
use crate::schedule;
use crate::table::{Entry, StateTable};
use crate::Structure;

pub(crate) struct AvlNode {
    pub entry: Entry,
    pub left: Option<u32>,
    pub right: Option<u32>,
    pub height: i32,
}

pub(crate) struct AvlInner {
    nodes: Vec<AvlNode>,
    pub root: Option<u32>,
    pub table: StateTable,
    pub data: LogData,
}

/// Log structure backed by a self-balancing search tree of entries.
pub struct AvlTreeHt {
    inner: RwLock<AvlInner>,
}

impl AvlTreeHt {
    /// Creates a tree structure with the default configuration.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AvlInner::new(LogConfig::default())),
        }
    }

    /// Creates a tree structure with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` violates the cross-field
    /// rules.
    pub fn with_config(config: LogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: RwLock::new(AvlInner::new(config)),
        })
    }

    /// Runs a reduce pass with an explicit algorithm over `[p, n]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` when `n < p`, `EmptyStructure` when nothing
    /// was logged, and `Unsupported` for non-tree algorithms.
    pub fn reduce_with(&self, alg: Reducer, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let inner = self.inner.read();
        ensure!(!inner.nodes.is_empty(), EmptyStructureSnafu);
        inner.run_reducer_with(alg, p, n)
    }
}

impl Default for AvlTreeHt {
    fn default() -> Self {
        Self::new()
    }
}

impl Structure for AvlTreeHt {
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
            inner.insert_entry(Entry {
                ind: cmd.id,
                key: cmd.key,
                state_at,
            })?;
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

impl fmt::Display for AvlTreeHt {
    /// Breadth-first dump of the tree as `(ind|key)` pairs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut queue: std::collections::VecDeque<u32> = inner.root.into_iter().collect();
        let mut sep = "";
        while let Some(at) = queue.pop_front() {
            let node = inner.node(at);
            write!(f, "{sep}({}|{})", node.entry.ind, node.entry.key)?;
            sep = ", ";
            queue.extend(node.left);
            queue.extend(node.right);
        }
        Ok(())
    }
}

impl AvlInner {
    fn new(config: LogConfig) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            table: StateTable::new(),
            data: LogData::new(config),
        }
    }

    pub(crate) fn node(&self, at: u32) -> &AvlNode {
        &self.nodes[at as usize]
    }

    fn insert_entry(&mut self, entry: Entry) -> Result<()> {
        let at = self.nodes.len() as u32;
        self.nodes.push(AvlNode {
            entry,
            left: None,
            right: None,
            height: 1,
        });

        match self.root {
            None => {
                self.root = Some(at);
                Ok(())
            }
            Some(root) => match self.recur_insert(root, at) {
                Ok(new_root) => {
                    self.root = Some(new_root);
                    Ok(())
                }
                Err(err) => {
                    // drop the orphaned arena slot before surfacing
                    self.nodes.pop();
                    Err(err)
                }
            },
        }
    }

    fn recur_insert(&mut self, root: u32, node: u32) -> Result<u32> {
        let node_ind = self.node(node).entry.ind;
        let root_ind = self.node(root).entry.ind;

        if node_ind < root_ind {
            let child = match self.node(root).left {
                Some(left) => self.recur_insert(left, node)?,
                None => node,
            };
            self.nodes[root as usize].left = Some(child);
        } else if node_ind > root_ind {
            let child = match self.node(root).right {
                Some(right) => self.recur_insert(right, node)?,
                None => node,
            };
            self.nodes[root as usize].right = Some(child);
        } else {
            // equal keys are not allowed in a BST
            return DuplicateIndexSnafu { ind: node_ind }.fail();
        }

        self.update_height(root);
        let balance = self.balance_factor(root);

        if balance > 1 {
            let Some(left) = self.nodes[root as usize].left else {
                return Ok(root);
            };
            // left-left
            if node_ind < self.node(left).entry.ind {
                return Ok(self.right_rotate(root));
            }
            // left-right
            if node_ind > self.node(left).entry.ind {
                let new_left = self.left_rotate(left);
                self.nodes[root as usize].left = Some(new_left);
                return Ok(self.right_rotate(root));
            }
        }
        if balance < -1 {
            let Some(right) = self.nodes[root as usize].right else {
                return Ok(root);
            };
            // right-right
            if node_ind > self.node(right).entry.ind {
                return Ok(self.left_rotate(root));
            }
            // right-left
            if node_ind < self.node(right).entry.ind {
                let new_right = self.right_rotate(right);
                self.nodes[root as usize].right = Some(new_right);
                return Ok(self.left_rotate(root));
            }
        }
        Ok(root)
    }

    fn right_rotate(&mut self, root: u32) -> u32 {
        let Some(son) = self.nodes[root as usize].left else {
            return root;
        };
        let grandson = self.nodes[son as usize].right;
        self.nodes[son as usize].right = Some(root);
        self.nodes[root as usize].left = grandson;
        self.update_height(root);
        self.update_height(son);
        son
    }

    fn left_rotate(&mut self, root: u32) -> u32 {
        let Some(son) = self.nodes[root as usize].right else {
            return root;
        };
        let grandson = self.nodes[son as usize].left;
        self.nodes[son as usize].left = Some(root);
        self.nodes[root as usize].right = grandson;
        self.update_height(root);
        self.update_height(son);
        son
    }

    fn update_height(&mut self, at: u32) {
        let left = self.height_of(self.nodes[at as usize].left);
        let right = self.height_of(self.nodes[at as usize].right);
        self.nodes[at as usize].height = 1 + left.max(right);
    }

    fn balance_factor(&self, at: u32) -> i32 {
        self.height_of(self.nodes[at as usize].left) - self.height_of(self.nodes[at as usize].right)
    }

    fn height_of(&self, at: Option<u32>) -> i32 {
        at.map(|h| self.node(h).height).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn reduce_log(&mut self, p: u64, n: u64) -> Result<()> {
        ensure!(!self.is_empty(), EmptyStructureSnafu);
        let cmds = self.run_reducer_with(self.data.config.alg, p, n)?;
        self.data.update_log_state(&cmds, p, n, false)
    }

    fn run_reducer_with(&self, alg: Reducer, p: u64, n: u64) -> Result<Vec<Command>> {
        match alg {
            Reducer::GreedyAvl => Ok(reduce::greedy_avl(self, p, n)),
            Reducer::IterBfsAvl => Ok(reduce::iter_bfs_avl(self, p, n)),
            Reducer::IterDfsAvl => Ok(reduce::iter_dfs_avl(self, p, n)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "avl tree",
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

    fn tree_with(ids: &[u64]) -> AvlTreeHt {
        let avl = AvlTreeHt::new();
        for &id in ids {
            avl.log(set(id, &id.to_string(), "v")).expect("set");
        }
        avl
    }

    fn assert_balanced(inner: &AvlInner, at: Option<u32>) -> i32 {
        let Some(at) = at else { return 0 };
        let node = inner.node(at);
        let left = assert_balanced(inner, node.left);
        let right = assert_balanced(inner, node.right);
        assert!(
            (left - right).abs() <= 1,
            "unbalanced at index {}",
            node.entry.ind
        );
        assert_eq!(node.height, 1 + left.max(right));
        1 + left.max(right)
    }

    #[test]
    fn test_monotonic_inserts_stay_balanced() {
        let avl = tree_with(&(1..=64).collect::<Vec<_>>());
        let inner = avl.inner.read();
        let height = assert_balanced(&inner, inner.root);
        assert!(height <= 7, "height {height} for 64 nodes");
    }

    #[test]
    fn test_rotation_cases_via_mixed_order() {
        // triggers left-left, right-right, and both mixed cases
        let avl = tree_with(&[50, 25, 75, 10, 30, 60, 90, 5, 28, 27]);
        let inner = avl.inner.read();
        assert_balanced(&inner, inner.root);
        assert_eq!(inner.nodes.len(), 10);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let avl = tree_with(&[1, 2, 3]);
        let err = avl.log(set(2, "again", "x")).expect_err("duplicate");
        assert!(matches!(
            err,
            minlog_types::MinlogError::DuplicateIndex { ind: 2 }
        ));
        // the failed insert left no orphan behind
        assert_eq!(avl.len(), 3);
    }

    #[test]
    fn test_in_order_traversal_matches_indices() {
        let avl = tree_with(&[8, 3, 11, 1, 6, 9, 14]);
        let out = avl
            .reduce_with(Reducer::IterDfsAvl, 1, 14)
            .expect("reduce over distinct keys");
        // distinct keys: every entry survives
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn test_display_is_bfs() {
        let avl = tree_with(&[2, 1, 3]);
        assert_eq!(avl.to_string(), "(2|2), (1|1), (3|3)");
    }

    #[test]
    fn test_pruned_reduce_respects_interval() {
        let avl = AvlTreeHt::new();
        for id in 1..=100u64 {
            avl.log(set(id, &format!("k{}", id % 10), &id.to_string()))
                .expect("set");
        }
        let out = avl.reduce_with(Reducer::GreedyAvl, 40, 60).expect("reduce");
        assert_eq!(out.len(), 10, "ten keys live inside [40, 60]");
        for cmd in &out {
            let id = cmd.id;
            assert!((40..=60).contains(&id), "kept out-of-interval id {id}");
        }
    }
}
