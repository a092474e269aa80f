//! Latency measurement for persistence events.
//!
//! When enabled, the engine samples one command per reduce period (with a
//! configurable draw chance) and records four wall-clock timestamps along
//! its path: `init` before the view mutex is taken, `write` once the append
//! lands, `fill` when the view completes its period, and `persist` when the
//! background worker finishes flushing. Samples flush as CSV on shutdown.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use minlog_types::Result;
use rand::Rng;
use snafu::ResultExt;

/// A sample is drawn once every `MEASURE_CHANCE` period boundaries on
/// average; 1 draws every period.
const MEASURE_CHANCE: u32 = 1;

pub(crate) struct LatencyMeasure {
    out_path: PathBuf,
    interval: usize,
    abs_index: usize,
    sample_at: usize,
    drawn: bool,

    init: Vec<i64>,
    write: Vec<i64>,
    fill: Vec<i64>,
    persist: Vec<i64>,
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl LatencyMeasure {
    /// Creates a measurer flushing to `out_path`; the file is created
    /// eagerly so path problems surface at construction.
    pub fn new(interval: usize, out_path: PathBuf) -> Result<Self> {
        File::create(&out_path).context(minlog_types::error::IoSnafu)?;
        Ok(Self {
            out_path,
            interval: interval.max(1),
            abs_index: 0,
            sample_at: 0,
            drawn: false,
            init: Vec::new(),
            write: Vec::new(),
            fill: Vec::new(),
            persist: Vec::new(),
        })
    }

    /// Observes a command arriving at the structure, possibly drawing it as
    /// the sample for this period and stamping `init`.
    pub fn on_command(&mut self) {
        self.abs_index += 1;
        let period_start = self.abs_index % self.interval == 1 || self.interval == 1;
        if period_start && !self.drawn && rand::thread_rng().gen_range(0..MEASURE_CHANCE) == 0 {
            self.ensure_slot(self.sample_at);
            self.init[self.sample_at] = now_nanos();
            self.drawn = true;
        }
    }

    /// Observes the command landing in the view, stamping `write` at the
    /// period start and `fill` at the period end (both for one-command
    /// periods).
    pub fn on_applied(&mut self) {
        if !self.drawn {
            return;
        }
        self.ensure_slot(self.sample_at);
        if self.interval == 1 {
            self.write[self.sample_at] = now_nanos();
            self.fill[self.sample_at] = now_nanos();
        } else if self.abs_index % self.interval == 1 {
            self.write[self.sample_at] = now_nanos();
        } else if self.abs_index % self.interval == 0 {
            self.fill[self.sample_at] = now_nanos();
        }
    }

    /// Hands the drawn sample slot to the persistence event, advancing the
    /// cursor. `None` when the current period was not drawn.
    pub fn take_slot(&mut self) -> Option<usize> {
        if !self.drawn {
            return None;
        }
        let slot = self.sample_at;
        self.sample_at += 1;
        self.drawn = false;
        Some(slot)
    }

    /// Stamps the persistence completion for a drawn sample.
    pub fn stamp_persist(&mut self, slot: usize) {
        self.ensure_slot(slot);
        self.persist[slot] = now_nanos();
    }

    /// Writes complete samples as `init,write,fill,persist` CSV lines,
    /// stopping at the first incomplete tuple.
    pub fn flush(&self) -> Result<()> {
        let fd = File::create(&self.out_path).context(minlog_types::error::IoSnafu)?;
        let mut out = BufWriter::new(fd);
        for i in 0..self.init.len() {
            let (init, write, fill, persist) = (
                self.init[i],
                *self.write.get(i).unwrap_or(&0),
                *self.fill.get(i).unwrap_or(&0),
                *self.persist.get(i).unwrap_or(&0),
            );
            if init == 0 || write == 0 || fill == 0 || persist == 0 {
                break;
            }
            writeln!(out, "{init},{write},{fill},{persist}")
                .context(minlog_types::error::IoSnafu)?;
        }
        out.flush().context(minlog_types::error::IoSnafu)?;
        Ok(())
    }

    fn ensure_slot(&mut self, at: usize) {
        let wanted = at + 1;
        for buf in [
            &mut self.init,
            &mut self.write,
            &mut self.fill,
            &mut self.persist,
        ] {
            if buf.len() < wanted {
                buf.resize(wanted, 0);
            }
        }
    }
}
