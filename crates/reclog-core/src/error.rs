//! Error Types for Reclog
//!
//! One error enum is shared by every crate in the workspace. The variants
//! partition failures the way the container format distinguishes them:
//!
//! ### I/O errors
//! - `Io`: a syscall failed (read/write/seek/sync/mmap), wrapped with the
//!   operation name and, where known, the file path.
//!
//! ### Malformed data
//! - `InvalidData`: a parse-level problem in the file itself - bad magic,
//!   hash mismatch, bad varint, invalid state machine, tag out of range,
//!   length overflow, decoded size mismatch. These are the errors the
//!   recovery machinery can skip past.
//!
//! ### Limits
//! - `ResourceExhausted`: position overflow, too many records, a buffer or
//!   message larger than addressable memory.
//! - `OutOfRange`: a seek beyond the end where the backend cannot grow, or
//!   a mapping too large for the address space.
//!
//! ### Capability
//! - `Unsupported`: the operation is not available on this backend, e.g.
//!   seeking a pipe or an unknown compression codec byte.
//!
//! ### Truncation
//! - `DataLoss`: the stream ended in the middle of a chunk. Kept separate
//!   from `InvalidData` because a truncated file may legitimately still be
//!   growing.
//!
//! All fallible operations return `Result<T>`, aliased below, so `?`
//! propagation works across the crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error during {op}{}: {source}", path_suffix(.path))]
    Io {
        op: &'static str,
        path: Option<std::path::PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("truncated stream: {0}")]
    DataLoss(String),
}

fn path_suffix(path: &Option<std::path::PathBuf>) -> String {
    match path {
        Some(path) => format!(" of {}", path.display()),
        None => String::new(),
    }
}

impl Error {
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: None,
            source,
        }
    }

    pub fn io_at(op: &'static str, path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: Some(path.into()),
            source,
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Error::InvalidData(message.into())
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Error::ResourceExhausted(message.into())
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Error::OutOfRange(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(message.into())
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Error::DataLoss(message.into())
    }

    /// True for errors that describe damage in the stored bytes rather than
    /// an environmental failure. Recovery only applies to these.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::InvalidData(_) | Error::DataLoss(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::io("file operation", source)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_message_contains_op() {
        let err = Error::io("read", std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let msg = format!("{}", err);
        assert!(msg.contains("read"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_io_error_message_contains_path() {
        let err = Error::io_at(
            "open",
            "/tmp/records.log",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/records.log"));
        assert!(msg.contains("open"));
    }

    #[test]
    fn test_invalid_data_is_corruption() {
        assert!(Error::invalid_data("bad hash").is_corruption());
        assert!(Error::data_loss("cut short").is_corruption());
    }

    #[test]
    fn test_environmental_errors_are_not_corruption() {
        assert!(!Error::unsupported("no seek").is_corruption());
        assert!(!Error::resource_exhausted("too many records").is_corruption());
        assert!(!Error::out_of_range("seek past end").is_corruption());
        let io = Error::io("write", std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!io.is_corruption());
    }

    #[test]
    fn test_from_io_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "y").into();
        assert!(matches!(err, Error::Io { .. }));
    }
}
