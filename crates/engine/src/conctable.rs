//! Concurrent rotating-view log structure.
//!
//! The table keeps `conc_level` independent minimal-state views. The
//! producer appends to the current view; when the schedule fires, the view
//! is handed to a background persister and the cursor rotates, so logging
//! never waits on serialization or disk. Recovery readers either trigger a
//! lazy reduce on the frozen view or read the most recently persisted one.
//!
//! # Locking
//!
//! The cursor mutex guards the current-view index and the per-view interval
//! counters; each view mutex guards that view's table and metadata. The
//! producer takes the view lock *before* releasing the cursor, so a
//! persister can never observe a half-applied append. A view with a queued
//! persist is marked pending; appends that wrap back onto it wait on the
//! view's condvar until the persister finishes, which keeps a reduce pass
//! from absorbing commands of the next epoch.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use minlog_types::error::{EmptyStructureSnafu, InvalidIntervalSnafu, UnsupportedSnafu};
use minlog_types::{
    Command, LogConfig, MinStateTable, Reducer, ReduceInterval, Result, State,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use snafu::{ensure, ResultExt};

use crate::circbuff::CHAN_BUFF_SIZE;
use crate::log_data::{log_folder, LogData};
use crate::measure::LatencyMeasure;
use crate::recovery;
use crate::reduce;
use crate::schedule;
use crate::Structure;

/// Default number of rotating views. Three keeps the producer off a slow
/// persister's critical path: while one view persists, two remain for
/// rotation.
pub(crate) const DEFAULT_CONC_LEVEL: usize = 3;

/// Flush count after which an `Immediately` schedule resets persistent view
/// state.
const RESET_ON_IMMEDIATELY: usize = 4000;

struct View {
    table: MinStateTable,
    data: LogData,
    /// A persist event for this view is queued or running.
    pending: bool,
}

struct ViewSlot {
    state: Mutex<View>,
    persisted: Condvar,
}

struct Cursor {
    current: usize,
    /// Per-view interval counters, advanced under the cursor lock.
    counters: Vec<u32>,
}

struct PersistEvent {
    view: usize,
    measure_slot: Option<usize>,
}

/// Concurrent multi-view log structure with asynchronous persistence.
pub struct ConcTable {
    views: Vec<ViewSlot>,
    cursor: Mutex<Cursor>,
    /// Most recently persisted view, published by the persisters.
    prev_log: AtomicUsize,
    conc_level: usize,
    config: LogConfig,
    log_folder: PathBuf,
    senders: Mutex<Vec<SyncSender<PersistEvent>>>,
    dispatch: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    measure: Option<Mutex<LatencyMeasure>>,
}

impl ConcTable {
    /// Creates a table with the default configuration and view count.
    pub fn new() -> Arc<Self> {
        let config = LogConfig {
            alg: Reducer::IterConcTable,
            ..LogConfig::default()
        };
        Self::with_config(DEFAULT_CONC_LEVEL, config)
            .expect("default concurrent-table configuration is valid")
    }

    /// Creates a table with a validated configuration and an explicit view
    /// count.
    ///
    /// Spawns one persister worker, or two when `parallel_io` is set; the
    /// second worker writes to the mirror path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid configs or a zero view
    /// count, and an I/O error if a persister cannot start.
    pub fn with_config(conc_level: usize, config: LogConfig) -> Result<Arc<Self>> {
        config.validate()?;
        ensure!(
            conc_level >= 1,
            minlog_types::error::ConfigSnafu {
                message: "conc_level must be at least 1".to_string(),
            }
        );

        let folder = log_folder(&config.fname);
        let measure = if config.measure {
            let out = folder.join(format!("latency-{}.csv", config.period));
            Some(Mutex::new(LatencyMeasure::new(config.period as usize, out)?))
        } else {
            None
        };

        let views = (0..conc_level)
            .map(|_| ViewSlot {
                state: Mutex::new(View {
                    table: MinStateTable::new(),
                    data: LogData::new(config.clone()),
                    pending: false,
                }),
                persisted: Condvar::new(),
            })
            .collect();

        let table = Arc::new(Self {
            views,
            cursor: Mutex::new(Cursor {
                current: 0,
                counters: vec![0; conc_level],
            }),
            prev_log: AtomicUsize::new(0),
            conc_level,
            log_folder: folder,
            config: config.clone(),
            senders: Mutex::new(Vec::new()),
            dispatch: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
            measure,
        });

        let persisters = if config.parallel_io { 2 } else { 1 };
        let mut senders = Vec::with_capacity(persisters);
        let mut workers = Vec::with_capacity(persisters);
        for id in 0..persisters {
            let (tx, rx) = std::sync::mpsc::sync_channel(CHAN_BUFF_SIZE);
            let handle = spawn_persister(Arc::clone(&table), rx, id, id == 1)?;
            senders.push(tx);
            workers.push(handle);
        }
        *table.senders.lock() = senders;
        *table.workers.lock() = workers;
        Ok(table)
    }

    /// Runs the view reducer over the current view; the interval arguments
    /// of other structures do not apply, since the view already is the
    /// reduced form.
    ///
    /// # Errors
    ///
    /// Returns `EmptyStructure` when the current view holds nothing and
    /// `Unsupported` for non-table algorithms.
    pub fn reduce_with(&self, alg: Reducer) -> Result<Vec<Command>> {
        let cur = self.cursor.lock().current;
        let view = self.lock_view(cur);
        ensure!(!view.table.is_empty(), EmptyStructureSnafu);
        match alg {
            Reducer::IterConcTable => Ok(reduce::iter_conc_table(&view.table)),
            other => UnsupportedSnafu {
                alg: other,
                structure: "concurrent table",
            }
            .fail(),
        }
    }

    /// Reassembles the whole persisted catalog: every `.log` segment in the
    /// configured folder, ordered, concatenated, plus the segment count.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the folder scan and `CorruptedLog` for a
    /// segment with an unreadable header.
    pub fn recov_entire_log(&self) -> Result<(Vec<u8>, usize)> {
        recovery::concat_segments(&self.log_folder)
    }

    /// Stops the persister workers after draining queued events, then
    /// flushes latency samples.
    pub fn shutdown(&self) {
        self.senders.lock().clear();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
        if let Some(measure) = &self.measure {
            if let Err(error) = measure.lock().flush() {
                tracing::warn!(%error, "failed to flush latency samples");
            }
        }
        tracing::info!("concurrent table shut down");
    }

    /// Locks a view, waiting out any queued or running persist for it.
    fn lock_view(&self, id: usize) -> MutexGuard<'_, View> {
        let slot = &self.views[id];
        let mut view = slot.state.lock();
        while view.pending {
            slot.persisted.wait(&mut view);
        }
        view
    }

    /// Reads the current view id and advances the cursor, freezing the old
    /// view for the caller.
    fn read_and_advance_current_view(&self) -> usize {
        let mut cursor = self.cursor.lock();
        let cur = cursor.current;
        cursor.current = (cursor.current + 1) % self.conc_level;
        cur
    }

    /// Reduces and persists `view` inline when the schedule demands it:
    /// always for `Delayed`, and for `Interval` before its first period
    /// fires. Returns the held guard so the caller reads the freshly
    /// written state without releasing the view.
    fn may_execute_lazy_reduce(&self, id: usize) -> Result<Option<MutexGuard<'_, View>>> {
        let mut view = self.lock_view(id);
        let lazy = match self.config.tick {
            ReduceInterval::Delayed => true,
            ReduceInterval::Interval => !view.data.first_reduce_exists(),
            ReduceInterval::Immediately => false,
        };
        if !lazy {
            return Ok(None);
        }
        let cmds = run_view_reducer(self.config.alg, &view.table)?;
        let (first, last) = (view.data.first, view.data.last);
        view.data.update_log_state(&cmds, first, last, false)?;
        Ok(Some(view))
    }

    /// Round-robin dispatch of a persist event; deterministic alternation
    /// keeps the primary and secondary disks balanced under parallel IO.
    /// Returns `false` when no persister could take the event.
    fn dispatch(&self, event: PersistEvent) -> bool {
        let senders = self.senders.lock();
        if senders.is_empty() {
            tracing::warn!("persisters are shut down; dropping reduce event");
            return false;
        }
        let at = self.dispatch.fetch_add(1, Ordering::Relaxed) % senders.len();
        if senders[at].send(event).is_err() {
            tracing::warn!("persister channel closed; dropping reduce event");
            return false;
        }
        true
    }

    /// Applies the view reducer and installs the result, running on a
    /// persister thread. `immediate_flushes` implements the saturation
    /// counter that delays state resets under `Immediately`.
    fn handle_persist(
        &self,
        id: usize,
        immediate_flushes: &mut usize,
        secondary: bool,
    ) -> Result<()> {
        let slot = &self.views[id];
        let mut view = slot.state.lock();

        let cmds = run_view_reducer(self.config.alg, &view.table)?;
        let (first, last) = (view.data.first, view.data.last);
        view.data.update_log_state(&cmds, first, last, secondary)?;

        if self.config.tick == ReduceInterval::Immediately {
            *immediate_flushes += 1;
            if *immediate_flushes < RESET_ON_IMMEDIATELY {
                view.pending = false;
                slot.persisted.notify_all();
                return Ok(());
            }
            *immediate_flushes = 0;
        }

        // readers observing prev_log find this view's persisted state
        self.prev_log.store(id, Ordering::Release);

        view.table.clear();
        view.data.reset_extents();
        view.pending = false;
        slot.persisted.notify_all();
        Ok(())
    }

    fn release_pending(&self, id: usize) {
        let slot = &self.views[id];
        let mut view = slot.state.lock();
        view.pending = false;
        slot.persisted.notify_all();
    }
}

impl Structure for ConcTable {
    fn log(&self, cmd: Command) -> Result<()> {
        let is_write = cmd.is_write();

        let mut cursor = self.cursor.lock();
        let cur = cursor.current;

        if let Some(measure) = &self.measure {
            measure.lock().on_command();
        }

        let action = schedule::next_action(
            self.config.tick,
            is_write,
            &mut cursor.counters[cur],
            self.config.period,
        );
        if action.advance {
            cursor.current = (cursor.current + 1) % self.conc_level;
            tracing::debug!(from = cur, to = cursor.current, "rotated current view");
        }

        // take the view before releasing the cursor; see the module notes
        let slot = &self.views[cur];
        let mut view = slot.state.lock();
        drop(cursor);
        while view.pending {
            slot.persisted.wait(&mut view);
        }

        view.data.observe(cmd.id);
        if is_write {
            view.table.insert(
                cmd.key.clone(),
                State {
                    ind: cmd.id,
                    cmd: cmd.clone(),
                },
            );
        }

        if let Some(measure) = &self.measure {
            measure.lock().on_applied();
        }

        if action.reduce {
            view.pending = true;
            drop(view);
            let measure_slot = self
                .measure
                .as_ref()
                .and_then(|measure| measure.lock().take_slot());
            if !self.dispatch(PersistEvent {
                view: cur,
                measure_slot,
            }) {
                self.release_pending(cur);
            }
        }
        Ok(())
    }

    /// Number of keys in the current view; commands already discarded by
    /// persisted epochs do not count.
    fn len(&self) -> u64 {
        let cur = self.cursor.lock().current;
        self.views[cur].state.lock().table.len() as u64
    }

    fn recov(&self, p: u64, n: u64) -> Result<Vec<Command>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let cur = self.read_and_advance_current_view();

        if let Some(view) = self.may_execute_lazy_reduce(cur)? {
            return view.data.retrieve_log();
        }
        let prev = self.prev_log.load(Ordering::Acquire);
        let view = self.lock_view(prev);
        view.data.retrieve_log()
    }

    fn recov_bytes(&self, p: u64, n: u64) -> Result<Vec<u8>> {
        ensure!(n >= p, InvalidIntervalSnafu { p, n });
        let cur = self.read_and_advance_current_view();

        if let Some(view) = self.may_execute_lazy_reduce(cur)? {
            let (first, last) = (view.data.first, view.data.last);
            return view.data.retrieve_raw_log(first, last);
        }
        let prev = self.prev_log.load(Ordering::Acquire);
        let view = self.lock_view(prev);
        let (first, last) = (view.data.first, view.data.last);
        view.data.retrieve_raw_log(first, last)
    }
}

impl fmt::Display for ConcTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, slot) in self.views.iter().enumerate() {
            let view = slot.state.lock();
            write!(
                f,
                "[view {}: {} keys, {}..{}] ",
                id,
                view.table.len(),
                view.data.first,
                view.data.last
            )?;
        }
        Ok(())
    }
}

fn run_view_reducer(alg: Reducer, view: &MinStateTable) -> Result<Vec<Command>> {
    match alg {
        Reducer::IterConcTable => Ok(reduce::iter_conc_table(view)),
        other => UnsupportedSnafu {
            alg: other,
            structure: "concurrent table",
        }
        .fail(),
    }
}

fn spawn_persister(
    table: Arc<ConcTable>,
    rx: Receiver<PersistEvent>,
    id: usize,
    secondary: bool,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("minlog-persist-{id}"))
        .spawn(move || {
            let mut immediate_flushes = 0usize;
            while let Ok(event) = rx.recv() {
                if let Err(error) =
                    table.handle_persist(event.view, &mut immediate_flushes, secondary)
                {
                    tracing::error!(
                        %error,
                        view = event.view,
                        "background persistence failed; aborting to avoid silent loss of \
                         compacted state"
                    );
                    std::process::exit(1);
                }
                if let Some(slot) = event.measure_slot {
                    if let Some(measure) = &table.measure {
                        measure.lock().stamp_persist(slot);
                    }
                }
            }
            tracing::debug!(persister = id, "persister drained and stopped");
        })
        .context(minlog_types::error::IoSnafu)
}
