//! Ring-buffer log structure.
//!
//! Entries land in a fixed-capacity circular buffer while a minimal state
//! table tracks the latest state per key. Reduce passes operate on a
//! snapshot taken under the mutex and run on a background worker, so the
//! producer never waits on serialization or disk. Filling the buffer resets
//! its state and schedules exactly one reduce for the completed window.

use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use minlog_types::error::{EmptyStructureSnafu, InvalidIntervalSnafu, UnsupportedSnafu};
use minlog_types::{
    Command, LogConfig, MinStateTable, Reducer, ReduceInterval, Result, State,
};
use parking_lot::Mutex;
use snafu::{ensure, ResultExt};

use crate::log_data::LogData;
use crate::reduce;
use crate::Structure;

/// Default ring capacity.
pub(crate) const DEFAULT_CAP: usize = 4000;

/// Bound for the background channels feeding reduce and persist workers.
pub(crate) const CHAN_BUFF_SIZE: usize = 128;

/// A ring slot: the entry without any state handle, since the latest state
/// lives in the minimal table.
#[derive(Debug, Clone, Default)]
pub(crate) struct BuffEntry {
    pub ind: u64,
    pub key: String,
}

/// Consistent copy of the ring and its table, taken under the mutex and
/// reduced lock-free afterwards.
pub(crate) struct BuffSnapshot {
    pub buf: Vec<BuffEntry>,
    pub tbl: MinStateTable,
    pub cur: usize,
    pub cap: usize,
    pub len: usize,
    pub first: u64,
    pub last: u64,
}

struct CircInner {
    buff: Vec<BuffEntry>,
    aux: MinStateTable,
    cur: usize,
    len: usize,
    logged: bool,
    first: u64,
    last: u64,
    count: u32,
}

/// Log structure backed by a fixed-capacity circular buffer.
pub struct CircBuffHt {
    inner: Mutex<CircInner>,
    persist: Arc<Mutex<LogData>>,
    cap: usize,
    alg: Reducer,
    tick: ReduceInterval,
    period: u32,
    reduce_tx: Mutex<Option<SyncSender<BuffSnapshot>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CircBuffHt {
    /// Creates a ring structure with the default configuration and
    /// capacity.
    pub fn new() -> Self {
        let config = LogConfig {
            alg: Reducer::IterCircBuff,
            ..LogConfig::default()
        };
        Self::with_config(config, DEFAULT_CAP).expect("default ring-buffer configuration is valid")
    }

    /// Creates a ring structure with a validated configuration and an
    /// explicit capacity.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid configs or a zero
    /// capacity, and an I/O error if the reduce worker cannot start.
    pub fn with_config(config: LogConfig, cap: usize) -> Result<Self> {
        config.validate()?;
        ensure!(
            cap > 0,
            minlog_types::error::ConfigSnafu {
                message: "ring capacity must be positive".to_string(),
            }
        );

        let persist = Arc::new(Mutex::new(LogData::new(config.clone())));
        let (tx, rx) = std::sync::mpsc::sync_channel(CHAN_BUFF_SIZE);
        let worker = spawn_reduce_worker(Arc::clone(&persist), config.alg, rx)?;

        Ok(Self {
            inner: Mutex::new(CircInner {
                buff: vec![BuffEntry::default(); cap],
                aux: MinStateTable::new(),
                cur: 0,
                len: 0,
                logged: false,
                first: 0,
                last: 0,
                count: 0,
            }),
            persist,
            cap,
            alg: config.alg,
            tick: config.tick,
            period: config.period,
            reduce_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Runs a reduce pass with an explicit algorithm over the current
    /// window; the interval arguments of other structures do not apply to
    /// ring snapshots.
    ///
    /// # Errors
    ///
    /// Returns `EmptyStructure` when nothing was logged and `Unsupported`
    /// for non-ring algorithms.
    pub fn reduce_with(&self, alg: Reducer) -> Result<Vec<Command>> {
        let snapshot = self.inner.lock().snapshot();
        ensure!(snapshot.len > 0, EmptyStructureSnafu);
        match alg {
            Reducer::IterCircBuff => Ok(reduce::iter_circ_buff(&snapshot)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "ring buffer",
            }
            .fail(),
        }
    }

    /// Stops the background reduce worker, draining queued snapshots.
    pub fn shutdown(&self) {
        drop(self.reduce_tx.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        tracing::info!("ring-buffer reduce worker stopped");
    }

    fn run_reducer_on(&self, snapshot: &BuffSnapshot) -> Result<Vec<Command>> {
        match self.alg {
            Reducer::IterCircBuff => Ok(reduce::iter_circ_buff(snapshot)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "ring buffer",
            }
            .fail(),
        }
    }

    fn may_execute_lazy_reduce(&self, snapshot: &BuffSnapshot) -> Result<()> {
        let lazy = match self.tick {
            ReduceInterval::Delayed => true,
            ReduceInterval::Interval => !self.persist.lock().first_reduce_exists(),
            ReduceInterval::Immediately => false,
        };
        if lazy {
            let cmds = self.run_reducer_on(snapshot)?;
            self.persist
                .lock()
                .update_log_state(&cmds, snapshot.first, snapshot.last, false)?;
        }
        Ok(())
    }

    fn send_snapshot(&self, snapshot: BuffSnapshot) {
        let guard = self.reduce_tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(snapshot).is_err() {
                    tracing::warn!("reduce worker is gone; dropping window snapshot");
                }
            }
            None => tracing::warn!("structure is shut down; dropping window snapshot"),
        }
    }
}

impl Default for CircBuffHt {
    fn default() -> Self {
        Self::new()
    }
}

impl Structure for CircBuffHt {
    fn log(&self, cmd: Command) -> Result<()> {
        let mut inner = self.inner.lock();
        let is_write = cmd.is_write();

        if !inner.logged {
            inner.first = cmd.id;
            inner.logged = true;
        }
        if is_write {
            inner.aux.insert(
                cmd.key.clone(),
                State {
                    ind: cmd.id,
                    cmd: cmd.clone(),
                },
            );
            let at = inner.cur;
            inner.buff[at] = BuffEntry {
                ind: cmd.id,
                key: cmd.key,
            };
            inner.cur = (at + 1) % self.cap;
            inner.len += 1;
        }
        inner.last = cmd.id;

        let at_cap = inner.len == self.cap;
        // snapshots are not free; delayed configs only copy when the
        // window completes
        if self.tick == ReduceInterval::Delayed && !at_cap {
            return Ok(());
        }
        let snapshot = inner.snapshot();

        let mut scheduled = false;
        if at_cap {
            inner.reset();
            scheduled = true;
        } else if self.tick == ReduceInterval::Interval {
            inner.count += 1;
            if inner.count >= self.period {
                inner.count = 0;
                scheduled = true;
            }
        }
        drop(inner);

        if scheduled {
            self.send_snapshot(snapshot);
            return Ok(());
        }
        if is_write && self.tick == ReduceInterval::Immediately {
            // the write path reduces in place, like the other single-writer
            // structures
            let cmds = self.run_reducer_on(&snapshot)?;
            return self
                .persist
                .lock()
                .update_log_state(&cmds, snapshot.first, snapshot.last, false);
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.inner.lock().len as u64
    }

    fn recov(&self, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let snapshot = self.inner.lock().snapshot();
        self.may_execute_lazy_reduce(&snapshot)?;
        self.persist.lock().retrieve_log()
    }

    fn recov_bytes(&self, p: u64, n: u64) -> Result<Vec<u8>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let snapshot = self.inner.lock().snapshot();
        self.may_execute_lazy_reduce(&snapshot)?;
        self.persist
            .lock()
            .retrieve_raw_log(snapshot.first, snapshot.last)
    }
}

impl fmt::Display for CircBuffHt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        for i in 0..inner.len {
            let pos = reduce::wrap_index(
                inner.cur as i64 - inner.len as i64 + i as i64,
                self.cap as i64,
            );
            let entry = &inner.buff[pos];
            write!(f, "({}|{}) -> ", entry.ind, entry.key)?;
        }
        Ok(())
    }
}

impl CircInner {
    fn snapshot(&self) -> BuffSnapshot {
        BuffSnapshot {
            buf: self.buff.clone(),
            tbl: self.aux.clone(),
            cur: self.cur,
            cap: self.buff.len(),
            len: self.len,
            first: self.first,
            last: self.last,
        }
    }

    fn reset(&mut self) {
        // old slots are overwritten by later insertions
        self.len = 0;
        self.count = 0;
        self.logged = false;
        self.first = 0;
        self.last = 0;
    }
}

fn spawn_reduce_worker(
    persist: Arc<Mutex<LogData>>,
    alg: Reducer,
    rx: Receiver<BuffSnapshot>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("minlog-ring-reduce".to_string())
        .spawn(move || {
            while let Ok(snapshot) = rx.recv() {
                let cmds = match alg {
                    Reducer::IterCircBuff => reduce::iter_circ_buff(&snapshot),
                    other => {
                        tracing::error!(
                            algorithm = ?other,
                            "unsupported reduce algorithm reached the ring worker; aborting"
                        );
                        std::process::exit(1);
                    }
                };
                let mut data = persist.lock();
                if let Err(error) =
                    data.update_log_state(&cmds, snapshot.first, snapshot.last, false)
                {
                    tracing::error!(
                        %error,
                        "background reduce failed; compacted state would be lost"
                    );
                    std::process::exit(1);
                }
            }
        })
        .context(minlog_types::error::IoSnafu)
}
