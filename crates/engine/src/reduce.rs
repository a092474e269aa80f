//! Reduce algorithms.
//!
//! Every reducer collapses a structure (or a snapshot of one) over an index
//! interval `[p, n]` into a minimal command list: at most one command per
//! distinct key, preserving the final value each key would hold after
//! executing the raw subsequence in order. Keys already emitted are tracked
//! in a per-run visited set, so each pass starts fresh.
//!
//! Intervals that miss the structure entirely (`p > last` or `n < first`)
//! yield an empty list; the error cases (`n < p`, empty structure,
//! algorithm/structure mismatch) are enforced by the dispatching structure.

use std::collections::HashSet;
use std::collections::VecDeque;

use minlog_types::{Command, MinStateTable};

use crate::array::ArrayInner;
use crate::avl::AvlInner;
use crate::circbuff::BuffSnapshot;
use crate::list::ListInner;
use crate::table::{Entry, StateTable};

/// Emits the newest state of the entry's key that still lies within `n`,
/// skipping keys already satisfied in this run.
fn emit_latest<'a>(
    table: &'a StateTable,
    entry: &'a Entry,
    n: u64,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<Command>,
) {
    if !visited.insert(entry.key.as_str()) {
        return;
    }
    let mut latest: Option<&Command> = None;
    for state in &table.updates(&entry.key)[entry.state_at..] {
        if state.ind > n {
            break;
        }
        latest = Some(&state.cmd);
    }
    if let Some(cmd) = latest {
        out.push(cmd.clone());
    }
}

/// Greedy walk over the linked-list structure.
///
/// Binary-searches the list for the first entry at index >= `p` using the
/// two-pointer midpoint, then walks forward emitting the last in-interval
/// update of each first-seen key.
pub(crate) fn greedy_list(inner: &ListInner, p: u64, n: u64) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let Some(start) = inner.search_entry_at_or_after(p) else {
        return out;
    };
    let mut node = Some(start);
    while let Some(at) = node {
        let current = inner.node(at);
        if current.entry.ind > n {
            break;
        }
        if current.entry.ind >= p {
            emit_latest(&inner.table, &current.entry, n, &mut visited, &mut out);
        }
        node = current.next;
    }
    out
}

/// Greedy walk over the array structure, locating the interval start with a
/// binary search on the entry array.
pub(crate) fn greedy_array(inner: &ArrayInner, p: u64, n: u64) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let start = inner.entries.partition_point(|e| e.ind < p);
    for entry in &inner.entries[start..] {
        if entry.ind > n {
            break;
        }
        emit_latest(&inner.table, entry, n, &mut visited, &mut out);
    }
    out
}

/// Recursive greedy descent over the AVL structure with interval pruning.
pub(crate) fn greedy_avl(inner: &AvlInner, p: u64, n: u64) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    greedy_avl_recur(inner, inner.root, p, n, &mut visited, &mut out);
    out
}

fn greedy_avl_recur<'a>(
    inner: &'a AvlInner,
    node: Option<u32>,
    p: u64,
    n: u64,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<Command>,
) {
    let Some(at) = node else {
        return;
    };
    let current = inner.node(at);
    if current.entry.ind >= p && current.entry.ind <= n {
        emit_latest(&inner.table, &current.entry, n, visited, out);
    }
    if current.entry.ind > p {
        greedy_avl_recur(inner, current.left, p, n, visited, out);
    }
    if current.entry.ind < n {
        greedy_avl_recur(inner, current.right, p, n, visited, out);
    }
}

/// Iterative breadth-first variant of the AVL reducer (explicit FIFO).
pub(crate) fn iter_bfs_avl(inner: &AvlInner, p: u64, n: u64) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<u32> = inner.root.into_iter().collect();

    while let Some(at) = queue.pop_front() {
        let current = inner.node(at);
        if current.entry.ind >= p && current.entry.ind <= n {
            emit_latest(&inner.table, &current.entry, n, &mut visited, &mut out);
        }
        if current.entry.ind > p {
            if let Some(left) = current.left {
                queue.push_back(left);
            }
        }
        if current.entry.ind < n {
            if let Some(right) = current.right {
                queue.push_back(right);
            }
        }
    }
    out
}

/// Iterative depth-first variant of the AVL reducer (explicit LIFO).
pub(crate) fn iter_dfs_avl(inner: &AvlInner, p: u64, n: u64) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<u32> = inner.root.into_iter().collect();

    while let Some(at) = stack.pop() {
        let current = inner.node(at);
        if current.entry.ind >= p && current.entry.ind <= n {
            emit_latest(&inner.table, &current.entry, n, &mut visited, &mut out);
        }
        if current.entry.ind > p {
            if let Some(left) = current.left {
                stack.push(left);
            }
        }
        if current.entry.ind < n {
            if let Some(right) = current.right {
                stack.push(right);
            }
        }
    }
    out
}

/// Walks a ring-buffer snapshot from newest to oldest; the first occurrence
/// of each key wins and its command comes from the snapshot's minimal state
/// table.
pub(crate) fn iter_circ_buff(snapshot: &BuffSnapshot) -> Vec<Command> {
    let mut out = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    for i in 0..snapshot.len {
        let pos = wrap_index(
            snapshot.cur as i64 - 1 - i as i64,
            snapshot.cap as i64,
        );
        let entry = &snapshot.buf[pos];
        if !visited.insert(entry.key.as_str()) {
            continue;
        }
        if let Some(state) = snapshot.tbl.get(&entry.key) {
            out.push(state.cmd.clone());
        }
    }
    out
}

/// Dumps a concurrent-table view; the minimal state table already *is* the
/// reduced form.
pub(crate) fn iter_conc_table(view: &MinStateTable) -> Vec<Command> {
    view.values().map(|state| state.cmd.clone()).collect()
}

/// Euclidean remainder for ring positions, mapping negative offsets back
/// into `[0, cap)`.
pub(crate) fn wrap_index(at: i64, cap: i64) -> usize {
    let rem = at % cap;
    let wrapped = if rem >= 0 { rem } else { rem + cap };
    wrapped as usize
}
