//! Error types for minlog using snafu.
//!
//! [`MinlogError`] is the unified taxonomy surfaced by the engine:
//! configuration and producer-contract violations, recovery interval
//! misuse, persistence I/O failures, and corrupted log detection. The
//! lower-level module errors ([`ConfigError`], [`CodecError`]) convert into
//! it so `?` composes across the crate boundary.

use snafu::{Location, Snafu};

use crate::codec::CodecError;
use crate::config::{ConfigError, Reducer};

/// Unified result type for engine operations.
pub type Result<T, E = MinlogError> = std::result::Result<T, E>;

/// Top-level error type for the compaction engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MinlogError {
    /// Configuration validation failed at construction.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// A recovery or reduce interval with `n < p` was requested.
    #[snafu(display("Invalid interval request: n ({n}) must be >= p ({p})"))]
    InvalidInterval {
        /// Lower bound of the requested interval.
        p: u64,
        /// Upper bound of the requested interval.
        n: u64,
    },

    /// Reduce was invoked on a structure with no logged entries.
    #[snafu(display("Cannot reduce an empty structure"))]
    EmptyStructure,

    /// The configured reduce algorithm does not match the structure.
    #[snafu(display("Unsupported reduce algorithm {alg:?} for a {structure} structure"))]
    Unsupported {
        /// The configured algorithm.
        alg: Reducer,
        /// Name of the structure that rejected it.
        structure: &'static str,
    },

    /// An index already present was inserted again, violating the
    /// single-producer contract.
    #[snafu(display("Duplicate index {ind} cannot be inserted"))]
    DuplicateIndex {
        /// The offending consensus index.
        ind: u64,
    },

    /// I/O error during persistence or recovery.
    #[snafu(display("I/O error at {location}: {source}"))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A persisted log failed deserialization: framing error or a missing
    /// end-of-log trailer where one was required.
    #[snafu(display("Corrupted log at {location}: {message}"))]
    CorruptedLog {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl From<ConfigError> for MinlogError {
    fn from(err: ConfigError) -> Self {
        MinlogError::Config {
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for MinlogError {
    #[track_caller]
    fn from(err: CodecError) -> Self {
        let loc = std::panic::Location::caller();
        let location = snafu::Location::new(loc.file(), loc.line(), loc.column());
        match err {
            CodecError::Io { source, .. } => MinlogError::Io { source, location },
            other => MinlogError::CorruptedLog {
                message: other.to_string(),
                location,
            },
        }
    }
}

impl From<std::io::Error> for MinlogError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        let loc = std::panic::Location::caller();
        MinlogError::Io {
            source,
            location: snafu::Location::new(loc.file(), loc.line(), loc.column()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MinlogError::InvalidInterval { p: 10, n: 3 };
        assert_eq!(
            err.to_string(),
            "Invalid interval request: n (3) must be >= p (10)"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let config_err = ConfigError::Validation {
            message: "interval schedule requires period > 0".to_string(),
        };
        let err: MinlogError = config_err.into();
        assert!(matches!(err, MinlogError::Config { .. }));
    }

    #[test]
    fn test_codec_trailer_maps_to_corrupted_log() {
        let err: MinlogError = CodecError::MissingTrailer.into();
        assert!(matches!(err, MinlogError::CorruptedLog { .. }));
    }

    #[test]
    fn test_codec_io_maps_to_io() {
        let source = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: MinlogError = MinlogError::from(source);
        assert!(matches!(err, MinlogError::Io { .. }));
    }
}
