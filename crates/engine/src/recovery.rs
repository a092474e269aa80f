//! Persistent-log catalog.
//!
//! Structures configured with `keep_all` leave one `.log` segment per
//! reduce epoch in the folder of their primary path. Recovery reassembles
//! the full compacted history by concatenating every segment in order; the
//! segment names embed the epoch's last index, so sorting by name length
//! first and lexicographically second yields chronological order without
//! parsing the names.

use std::fs;
use std::path::{Path, PathBuf};

use minlog_types::{codec, Result};
use snafu::ResultExt;

/// Lists the `.log` segments in `folder`, sorted by `(name length,
/// lexicographic)`.
///
/// # Errors
///
/// Returns an I/O error when the folder cannot be enumerated.
pub fn list_segments(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(folder).context(minlog_types::error::IoSnafu)? {
        let path = entry.context(minlog_types::error::IoSnafu)?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") && path.is_file() {
            segments.push(path);
        }
    }
    segments.sort_by(|a, b| {
        let (a, b) = (segment_name(a), segment_name(b));
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    });
    Ok(segments)
}

fn segment_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Concatenates every `.log` segment in `folder` into one byte buffer,
/// returning it with the segment count.
///
/// Each segment's header is validated before its raw bytes are appended, so
/// a damaged file surfaces as `CorruptedLog` instead of poisoning the
/// reassembled stream.
///
/// # Errors
///
/// Returns I/O errors from enumeration or reads, and `CorruptedLog` for a
/// segment whose header does not parse.
pub fn concat_segments(folder: &Path) -> Result<(Vec<u8>, usize)> {
    let segments = list_segments(folder)?;
    let mut buf = Vec::new();
    for path in &segments {
        let bytes = fs::read(path).context(minlog_types::error::IoSnafu)?;
        codec::read_header(&mut bytes.as_slice())?;
        buf.extend_from_slice(&bytes);
    }
    tracing::debug!(
        folder = %folder.display(),
        segments = segments.len(),
        bytes = buf.len(),
        "reassembled log catalog"
    );
    Ok((buf, segments.len()))
}
