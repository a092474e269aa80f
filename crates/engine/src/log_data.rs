//! Shared log metadata and the persistence paths behind every structure.
//!
//! Each structure (and each concurrent-table view) owns a [`LogData`]: the
//! interval extents it has absorbed plus the most recently reduced output,
//! either cached in memory (`inmem`) or written to disk. Retrieval for the
//! `Recov*` operations reads back whatever the last reduce produced.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use minlog_types::codec;
use minlog_types::{Command, LogConfig, Result};
use snafu::ResultExt;

/// Interval extents and reduced-output state shared by the structures.
#[derive(Debug)]
pub(crate) struct LogData {
    /// The structure's configuration.
    pub config: LogConfig,
    /// Whether any command has been logged since the last reset.
    pub logged: bool,
    /// Lowest consensus index absorbed since the last reset.
    pub first: u64,
    /// Highest consensus index absorbed.
    pub last: u64,
    /// Commands seen since the last interval trigger.
    pub count: u32,
    /// Most recent reduced output when running in memory.
    pub recent_log: Option<Vec<Command>>,
    /// File holding the most recent reduced output when persistent.
    persisted: Option<PathBuf>,
}

impl LogData {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            logged: false,
            first: 0,
            last: 0,
            count: 0,
            recent_log: None,
            persisted: None,
        }
    }

    /// Folds a command index into the tracked extents.
    ///
    /// The first logged command fixes `first` regardless of its operation,
    /// so `[first, last]` always bounds the observed interval.
    pub fn observe(&mut self, id: u64) {
        if !self.logged {
            self.first = id;
            self.logged = true;
        }
        self.last = id;
    }

    /// Clears the extents after a persisted epoch; the reduced output
    /// (cache or file) survives so readers can still retrieve it.
    pub fn reset_extents(&mut self) {
        self.logged = false;
        self.first = 0;
        self.last = 0;
    }

    /// Whether a reduce pass has produced retrievable output yet.
    pub fn first_reduce_exists(&self) -> bool {
        if self.config.inmem {
            self.recent_log.is_some()
        } else {
            self.persisted.is_some()
        }
    }

    /// Installs a freshly reduced command list as the current log state.
    ///
    /// In-memory configs replace the cached log; persistent configs write a
    /// compacted-dialect file, a new `<stem>.<last>.log` segment when
    /// `keep_all` is set, with a durable flush when `sync` is set.
    /// `secondary` routes the write to the mirror path configured for
    /// parallel IO.
    pub fn update_log_state(
        &mut self,
        cmds: &[Command],
        first: u64,
        last: u64,
        secondary: bool,
    ) -> Result<()> {
        if self.config.inmem {
            self.recent_log = Some(cmds.to_vec());
            return Ok(());
        }

        let path = self.target_path(last, secondary);
        let mut fd = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .context(minlog_types::error::IoSnafu)?;

        if self.config.sync {
            codec::marshal_log_buffered(&mut fd, cmds, first, last)?;
            fd.sync_all().context(minlog_types::error::IoSnafu)?;
        } else {
            codec::marshal_log(&mut fd, cmds, first, last)?;
        }

        tracing::debug!(
            path = %path.display(),
            commands = cmds.len(),
            first,
            last,
            "installed reduced log state"
        );
        self.persisted = Some(path);
        Ok(())
    }

    /// Reads back the most recent reduced output as commands.
    pub fn retrieve_log(&self) -> Result<Vec<Command>> {
        if self.config.inmem {
            return Ok(self.recent_log.clone().unwrap_or_default());
        }
        let path = self.read_path();
        let mut fd = File::open(&path).context(minlog_types::error::IoSnafu)?;
        Ok(codec::unmarshal_log(&mut fd)?)
    }

    /// Reads back the most recent reduced output as serialized bytes,
    /// skipping the decode round-trip on persistent configs.
    pub fn retrieve_raw_log(&self, p: u64, n: u64) -> Result<Vec<u8>> {
        if self.config.inmem {
            let cmds = self.recent_log.clone().unwrap_or_default();
            let mut buf = Vec::new();
            codec::marshal_log(&mut buf, &cmds, p, n)?;
            return Ok(buf);
        }
        let path = self.read_path();
        fs::read(&path).context(minlog_types::error::IoSnafu)
    }

    fn read_path(&self) -> PathBuf {
        self.persisted
            .clone()
            .unwrap_or_else(|| self.config.fname.clone())
    }

    fn target_path(&self, last: u64, secondary: bool) -> PathBuf {
        let base = if secondary {
            self.config
                .second_fname
                .clone()
                .unwrap_or_else(|| self.config.fname.clone())
        } else {
            self.config.fname.clone()
        };
        if !self.config.keep_all {
            return base;
        }
        let stem = base
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("state");
        base.with_file_name(format!("{stem}.{last}.log"))
    }
}

/// The folder holding a log path, `.` when the path has no parent.
pub(crate) fn log_folder(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
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

    #[test]
    fn test_observe_tracks_extents() {
        let mut data = LogData::new(LogConfig::default());
        assert!(!data.logged);
        data.observe(7);
        data.observe(9);
        assert!(data.logged);
        assert_eq!((data.first, data.last), (7, 9));

        data.reset_extents();
        assert!(!data.logged);
        assert_eq!((data.first, data.last), (0, 0));
    }

    #[test]
    fn test_inmem_update_and_retrieve() {
        let mut data = LogData::new(LogConfig::default());
        assert!(!data.first_reduce_exists());

        let cmds = vec![set(1, "a", "1"), set(2, "b", "2")];
        data.update_log_state(&cmds, 1, 2, false).expect("update");
        assert!(data.first_reduce_exists());
        assert_eq!(data.retrieve_log().expect("retrieve"), cmds);

        let raw = data.retrieve_raw_log(1, 2).expect("raw");
        let back = codec::unmarshal_log(&mut raw.as_slice()).expect("unmarshal");
        assert_eq!(back, cmds);
    }

    #[test]
    fn test_persistent_overwrite_single_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LogConfig::builder()
            .inmem(false)
            .fname(dir.path().join("state.log"))
            .build()
            .expect("config");
        let mut data = LogData::new(config);

        data.update_log_state(&[set(1, "a", "1")], 1, 1, false)
            .expect("first flush");
        data.update_log_state(&[set(2, "a", "2")], 1, 2, false)
            .expect("second flush");

        // single file, truncated in place
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let back = data.retrieve_log().expect("retrieve");
        assert_eq!(back, vec![set(2, "a", "2")]);
    }

    #[test]
    fn test_keep_all_names_segments_by_last_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LogConfig::builder()
            .inmem(false)
            .keep_all(true)
            .fname(dir.path().join("state.log"))
            .build()
            .expect("config");
        let mut data = LogData::new(config);

        data.update_log_state(&[set(1, "a", "1")], 1, 100, false)
            .expect("flush 100");
        data.update_log_state(&[set(2, "a", "2")], 101, 200, false)
            .expect("flush 200");

        assert!(dir.path().join("state.100.log").exists());
        assert!(dir.path().join("state.200.log").exists());
    }

    #[test]
    fn test_sync_config_still_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LogConfig::builder()
            .inmem(false)
            .sync(true)
            .fname(dir.path().join("state.log"))
            .build()
            .expect("config");
        let mut data = LogData::new(config);

        let cmds = vec![set(5, "k", "v")];
        data.update_log_state(&cmds, 5, 5, false).expect("flush");
        assert_eq!(data.retrieve_log().expect("retrieve"), cmds);
    }

    #[test]
    fn test_log_folder_derivation() {
        assert_eq!(
            log_folder(Path::new("/var/data/state.log")),
            PathBuf::from("/var/data")
        );
        assert_eq!(log_folder(Path::new("state.log")), PathBuf::from("."));
    }
}
