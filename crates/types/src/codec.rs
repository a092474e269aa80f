//! Serialization codec for command logs.
//!
//! Individual commands travel as postcard frames prefixed with a 32-bit
//! big-endian length. A serialized log is one of two dialects sharing an
//! ASCII header of three decimal lines (`first`, `last`, `count`):
//!
//! - **Compacted**: `count >= 0`, exactly `count` frames follow, terminated
//!   by the literal `\nEOL\n` trailer. A missing trailer on read is a
//!   corruption error.
//! - **Traditional**: `count == -1`, frames follow until EOF, no trailer.
//!
//! Append-mode logs write the header with fixed-width fields so
//! [`update_header`] can rewrite it in place without disturbing the frames
//! behind it.

use std::io::{Read, Seek, SeekFrom, Write};

use snafu::{Location, ResultExt, Snafu, ensure};

use crate::types::Command;

/// End-of-log trailer terminating the compacted dialect.
pub const EOL_TRAILER: &[u8] = b"\nEOL\n";

/// Header count value marking the traditional (EOF-terminated) dialect.
pub const TRADITIONAL_COUNT: i64 = -1;

/// Upper bound on a single command frame; larger lengths indicate a
/// corrupted stream rather than a legitimate command.
const MAX_FRAME_LEN: u32 = 1 << 26;

/// Longest accepted header line (20 digits, optional sign, slack).
const MAX_HEADER_LINE: usize = 32;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// Command encoding failed.
    #[snafu(display("Command encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Command decoding failed.
    #[snafu(display("Command decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// I/O failure while reading or writing a log stream.
    #[snafu(display("I/O failure at {location}: {source}"))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The three-line ASCII header could not be parsed.
    #[snafu(display("Malformed log header: {message}"))]
    Header {
        /// Description of the parse failure.
        message: String,
    },

    /// A compacted log ended without its `\nEOL\n` trailer.
    #[snafu(display("Compacted log is missing its end-of-log trailer"))]
    MissingTrailer,

    /// A frame length prefix exceeded the plausible maximum.
    #[snafu(display("Implausible command frame length {len}"))]
    FrameLength {
        /// The offending length prefix.
        len: u32,
    },
}

/// Parsed log header: the interval delimiters and the command count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// First consensus index covered by the log.
    pub first: u64,
    /// Last consensus index covered by the log.
    pub last: u64,
    /// Number of commands, or [`TRADITIONAL_COUNT`] for the traditional
    /// dialect.
    pub count: i64,
}

/// Encodes a single command into its wire frame payload.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(cmd).context(EncodeSnafu)
}

/// Decodes a single command from its wire frame payload.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if deserialization fails.
pub fn decode_command(bytes: &[u8]) -> Result<Command, CodecError> {
    postcard::from_bytes(bytes).context(DecodeSnafu)
}

fn write_frames<W: Write>(w: &mut W, cmds: &[Command]) -> Result<(), CodecError> {
    for cmd in cmds {
        let raw = encode_command(cmd)?;
        let len = u32::try_from(raw.len()).map_err(|_| CodecError::FrameLength { len: u32::MAX })?;
        ensure!(len <= MAX_FRAME_LEN, FrameLengthSnafu { len });
        w.write_all(&len.to_be_bytes()).context(IoSnafu)?;
        w.write_all(&raw).context(IoSnafu)?;
    }
    Ok(())
}

/// Serializes a compacted log: header, length-prefixed commands, trailer.
///
/// # Errors
///
/// Returns [`CodecError`] on encoding or write failures.
pub fn marshal_log<W: Write>(
    w: &mut W,
    cmds: &[Command],
    first: u64,
    last: u64,
) -> Result<(), CodecError> {
    write!(w, "{}\n{}\n{}\n", first, last, cmds.len()).context(IoSnafu)?;
    write_frames(w, cmds)?;
    w.write_all(EOL_TRAILER).context(IoSnafu)
}

/// Serializes a compacted log through an in-memory staging buffer, issuing a
/// single write to `w`.
///
/// Used on `sync` configurations so the durable flush that follows covers
/// one contiguous write instead of many small ones.
///
/// # Errors
///
/// Returns [`CodecError`] on encoding or write failures.
pub fn marshal_log_buffered<W: Write>(
    w: &mut W,
    cmds: &[Command],
    first: u64,
    last: u64,
) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    marshal_log(&mut buf, cmds, first, last)?;
    w.write_all(&buf).context(IoSnafu)
}

/// Appends length-prefixed commands to the end of a seekable log.
///
/// No header or trailer is written; pair with [`update_header`] to keep the
/// header lines of an append-mode (traditional) log current.
///
/// # Errors
///
/// Returns [`CodecError`] on encoding or write failures.
pub fn marshal_append<W: Write + Seek>(w: &mut W, cmds: &[Command]) -> Result<(), CodecError> {
    w.seek(SeekFrom::End(0)).context(IoSnafu)?;
    write_frames(w, cmds)
}

/// Rewrites the three header lines of a seekable log in place.
///
/// Fields are zero-padded to a fixed width so successive rewrites occupy
/// exactly the same bytes; the command frames that follow are untouched.
/// Pass [`TRADITIONAL_COUNT`] as `count` for the traditional dialect.
///
/// # Errors
///
/// Returns [`CodecError::Io`] on seek or write failures.
pub fn update_header<W: Write + Seek>(
    w: &mut W,
    first: u64,
    last: u64,
    count: i64,
) -> Result<(), CodecError> {
    w.seek(SeekFrom::Start(0)).context(IoSnafu)?;
    write!(w, "{:020}\n{:020}\n{:020}\n", first, last, count).context(IoSnafu)
}

fn read_ascii_line<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = r.read(&mut byte).context(IoSnafu)?;
        if n == 0 {
            return Err(CodecError::Header {
                message: "unexpected end of stream inside header".to_string(),
            });
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HEADER_LINE {
            return Err(CodecError::Header {
                message: "header line exceeds maximum length".to_string(),
            });
        }
    }
    String::from_utf8(line).map_err(|_| CodecError::Header {
        message: "header line is not ASCII".to_string(),
    })
}

/// Reads the three-line log header from `r`.
///
/// Reads byte-at-a-time so no frame bytes past the final newline are
/// consumed; callers can continue reading frames from the same stream.
///
/// # Errors
///
/// Returns [`CodecError::Header`] on malformed input, [`CodecError::Io`] on
/// read failures.
pub fn read_header<R: Read>(r: &mut R) -> Result<LogHeader, CodecError> {
    let first = parse_field::<u64>(&read_ascii_line(r)?, "first")?;
    let last = parse_field::<u64>(&read_ascii_line(r)?, "last")?;
    let count = parse_field::<i64>(&read_ascii_line(r)?, "count")?;
    if count < TRADITIONAL_COUNT {
        return Err(CodecError::Header {
            message: format!("negative command count {count}"),
        });
    }
    Ok(LogHeader { first, last, count })
}

fn parse_field<T: std::str::FromStr>(line: &str, field: &str) -> Result<T, CodecError> {
    line.trim().parse().map_err(|_| CodecError::Header {
        message: format!("cannot parse {field} from {line:?}"),
    })
}

fn read_frame_exact<R: Read>(r: &mut R) -> Result<Command, CodecError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).context(IoSnafu)?;
    let len = u32::from_be_bytes(len_buf);
    ensure!(len <= MAX_FRAME_LEN, FrameLengthSnafu { len });
    let mut raw = vec![0u8; len as usize];
    r.read_exact(&mut raw).context(IoSnafu)?;
    decode_command(&raw)
}

fn read_frame_or_eof<R: Read>(r: &mut R) -> Result<Option<Command>, CodecError> {
    let mut len_buf = [0u8; 4];
    let n = r.read(&mut len_buf[..1]).context(IoSnafu)?;
    if n == 0 {
        return Ok(None);
    }
    r.read_exact(&mut len_buf[1..]).context(IoSnafu)?;
    let len = u32::from_be_bytes(len_buf);
    ensure!(len <= MAX_FRAME_LEN, FrameLengthSnafu { len });
    let mut raw = vec![0u8; len as usize];
    r.read_exact(&mut raw).context(IoSnafu)?;
    decode_command(&raw).map(Some)
}

/// Reads exactly `wanted` length-prefixed commands from `r`.
///
/// No trailer is consumed or required; this is the entry point for reading
/// a log that is still being appended to, or for walking concatenated
/// segments one at a time after [`read_header`].
///
/// # Errors
///
/// Returns [`CodecError`] if the stream ends early or a frame fails to
/// decode.
pub fn unmarshal_with_len<R: Read>(r: &mut R, wanted: usize) -> Result<Vec<Command>, CodecError> {
    let mut cmds = Vec::with_capacity(wanted);
    for _ in 0..wanted {
        cmds.push(read_frame_exact(r)?);
    }
    Ok(cmds)
}

/// Consumes and verifies the end-of-log trailer.
///
/// # Errors
///
/// Returns [`CodecError::MissingTrailer`] if the stream ends or holds
/// different bytes where the trailer should be.
pub fn read_trailer<R: Read>(r: &mut R) -> Result<(), CodecError> {
    let mut buf = [0u8; 5];
    match r.read_exact(&mut buf) {
        Ok(()) if buf == *EOL_TRAILER => Ok(()),
        Ok(()) => Err(CodecError::MissingTrailer),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CodecError::MissingTrailer),
        Err(source) => Err(CodecError::Io {
            source,
            location: Location::default(),
        }),
    }
}

/// Deserializes a full log stream, dispatching on the header count.
///
/// Compacted dialect (`count >= 0`): reads exactly `count` commands and, when
/// `count > 0`, requires the end-of-log trailer. Traditional dialect
/// (`count == -1`): reads commands until EOF.
///
/// # Errors
///
/// Returns [`CodecError::MissingTrailer`] when a required trailer is absent,
/// and [`CodecError`] variants for header, framing, or I/O failures.
pub fn unmarshal_log<R: Read>(r: &mut R) -> Result<Vec<Command>, CodecError> {
    let header = read_header(r)?;
    if header.count == TRADITIONAL_COUNT {
        let mut cmds = Vec::new();
        while let Some(cmd) = read_frame_or_eof(r)? {
            cmds.push(cmd);
        }
        return Ok(cmds);
    }

    let cmds = unmarshal_with_len(r, header.count as usize)?;
    if header.count > 0 {
        read_trailer(r)?;
    } else {
        // empty logs still carry the trailer when written by marshal_log,
        // but its absence is tolerated
        let _ = read_trailer(r);
    }
    Ok(cmds)
}
