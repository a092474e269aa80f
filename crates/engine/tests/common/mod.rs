//! Shared helpers for the integration scenarios: seeded random workloads,
//! structure builders, and the log-equivalence relations used to compare
//! reduce output against recovery output.

// not every test binary uses every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use minlog_engine::{
    ArrayHt, AvlTreeHt, CircBuffHt, Command, ConcTable, ListHt, LogConfig, Op, Reducer, Structure,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The five structure families under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    List,
    Array,
    Avl,
    CircBuff,
    ConcTable,
}

pub const ALL_KINDS: [Kind; 5] = [
    Kind::List,
    Kind::Array,
    Kind::Avl,
    Kind::CircBuff,
    Kind::ConcTable,
];

impl Kind {
    /// The reducer that matches this structure family.
    pub fn algorithm(self) -> Reducer {
        match self {
            Kind::List => Reducer::GreedyList,
            Kind::Array => Reducer::GreedyArray,
            Kind::Avl => Reducer::IterDfsAvl,
            Kind::CircBuff => Reducer::IterCircBuff,
            Kind::ConcTable => Reducer::IterConcTable,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::List => "List",
            Kind::Array => "Array",
            Kind::Avl => "AVLTree",
            Kind::CircBuff => "CircBuff",
            Kind::ConcTable => "ConcTable",
        }
    }
}

/// A structure under test, keeping the concrete handles that expose
/// `reduce_with` and `shutdown`.
pub enum Built {
    List(Arc<ListHt>),
    Array(Arc<ArrayHt>),
    Avl(Arc<AvlTreeHt>),
    CircBuff(Arc<CircBuffHt>),
    ConcTable(Arc<ConcTable>),
}

impl Built {
    pub fn with_config(kind: Kind, config: LogConfig, cap: usize) -> Built {
        match kind {
            Kind::List => Built::List(Arc::new(ListHt::with_config(config).expect("list"))),
            Kind::Array => Built::Array(Arc::new(ArrayHt::with_config(config).expect("array"))),
            Kind::Avl => Built::Avl(Arc::new(AvlTreeHt::with_config(config).expect("avl"))),
            Kind::CircBuff => {
                Built::CircBuff(Arc::new(CircBuffHt::with_config(config, cap).expect("ring")))
            }
            Kind::ConcTable => Built::ConcTable(ConcTable::with_config(3, config).expect("table")),
        }
    }

    pub fn structure(&self) -> &dyn Structure {
        match self {
            Built::List(s) => s.as_ref(),
            Built::Array(s) => s.as_ref(),
            Built::Avl(s) => s.as_ref(),
            Built::CircBuff(s) => s.as_ref(),
            Built::ConcTable(s) => s.as_ref(),
        }
    }

    /// Runs the matching reducer directly, bypassing the recovery path.
    pub fn reduce(&self, alg: Reducer, p: u64, n: u64) -> Vec<Command> {
        match self {
            Built::List(s) => s.reduce_with(alg, p, n).expect("list reduce"),
            Built::Array(s) => s.reduce_with(alg, p, n).expect("array reduce"),
            Built::Avl(s) => s.reduce_with(alg, p, n).expect("avl reduce"),
            Built::CircBuff(s) => s.reduce_with(alg).expect("ring reduce"),
            Built::ConcTable(s) => s.reduce_with(alg).expect("table reduce"),
        }
    }

    /// Drains background workers so recovery reads deterministic state.
    pub fn settle(&self) {
        match self {
            Built::CircBuff(s) => s.shutdown(),
            Built::ConcTable(s) => s.shutdown(),
            _ => {}
        }
    }
}

/// Generates a seeded random workload: ids `0..n`, `write_percent` SETs over
/// `distinct_keys` keys, GETs elsewhere.
pub fn random_workload(seed: u64, n: u64, write_percent: u32, distinct_keys: u32) -> Vec<Command> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|id| {
            let key = rng.gen_range(0..distinct_keys).to_string();
            if rng.gen_range(0..100) < write_percent {
                Command {
                    id,
                    op: Op::Set,
                    key,
                    value: rng.gen::<u32>().to_string(),
                }
            } else {
                Command {
                    id,
                    op: Op::Get,
                    key,
                    value: String::new(),
                }
            }
        })
        .collect()
}

/// Sequentially executes the SETs of `cmds` whose ids fall in `[p, n]`,
/// returning the final per-key mapping.
pub fn replay(cmds: &[Command], p: u64, n: u64) -> HashMap<String, String> {
    let mut state = HashMap::new();
    for cmd in cmds {
        if cmd.op == Op::Set && cmd.id >= p && cmd.id <= n {
            state.insert(cmd.key.clone(), cmd.value.clone());
        }
    }
    state
}

fn index_map(cmds: &[Command]) -> HashMap<&str, u64> {
    cmds.iter().map(|c| (c.key.as_str(), c.id)).collect()
}

/// Two logs are equivalent when they have the same length and their
/// sequential execution yields identical final per-key values.
pub fn logs_are_equivalent(a: &[Command], b: &[Command]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    replay(a, 0, u64::MAX) == replay(b, 0, u64::MAX)
}

/// Two logs are "only delayed" when one is a consistent earlier snapshot of
/// the other: every key of the older log appears in the newer one at an
/// equal or later index.
pub fn logs_are_only_delayed(a: &[Command], b: &[Command]) -> bool {
    fn delayed(newer: &[Command], older: &[Command]) -> bool {
        let newer = index_map(newer);
        index_map(older)
            .iter()
            .all(|(key, &id)| newer.get(key).is_some_and(|&later| later >= id))
    }
    delayed(a, b) || delayed(b, a)
}
