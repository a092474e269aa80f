//! Per-key update histories and the entries that index into them.
//!
//! The single-writer structures keep every state a key moved through inside
//! a [`StateTable`]; the primary ordered container (list, array, tree) holds
//! [`Entry`] records that address a specific position in that history. Both
//! sides use plain indices as handles, so an entry can jump to "its" state
//! and fast-forward through later updates of the same key in O(1) steps
//! without any pointer cycles.

use std::collections::HashMap;

use minlog_types::State;

/// One record in a primary ordered container.
///
/// `state_at` is the offset of the state this entry produced inside the
/// per-key history of `key`.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    /// Consensus index of the command, strictly monotonic across entries.
    pub ind: u64,
    /// Key the command wrote.
    pub key: String,
    /// Handle into the key's update history.
    pub state_at: usize,
}

/// Append-only update histories, one per key.
#[derive(Debug, Default)]
pub(crate) struct StateTable {
    keys: HashMap<String, Vec<State>>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a state to the key's history, returning its offset.
    pub fn append(&mut self, key: &str, state: State) -> usize {
        let history = self.keys.entry(key.to_owned()).or_default();
        history.push(state);
        history.len() - 1
    }

    /// The full update history for `key`, oldest first.
    pub fn updates(&self, key: &str) -> &[State] {
        self.keys.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}
