//! Error taxonomy for the offload pipeline.
//!
//! Every fallible stage returns [`GemmError`]. Verification mismatches are not
//! errors; they are reported through [`crate::VerificationReport`].

use std::fmt;
use std::path::PathBuf;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, GemmError>;

/// Dimension errors raised while building or combining matrices.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Declared dimensions disagree with the number of available elements.
    #[error("expected {rows}x{cols} = {expected} elements, found {found}")]
    ElementCount { rows: usize, cols: usize, expected: usize, found: usize },

    /// A matrix with a zero-sized dimension.
    #[error("matrix dimensions must be non-zero, got {rows}x{cols}")]
    ZeroDimension { rows: usize, cols: usize },

    /// `rows * cols` does not fit in `usize`.
    #[error("matrix dimensions {rows}x{cols} overflow")]
    Overflow { rows: usize, cols: usize },

    /// A's column count does not match B's row count.
    #[error("cannot multiply {a_rows}x{a_cols} by {b_rows}x{b_cols}: inner dimensions differ")]
    InnerDimension { a_rows: usize, a_cols: usize, b_rows: usize, b_cols: usize },

    /// Actual and expected matrices have different shapes.
    #[error("shape mismatch: actual is {actual_rows}x{actual_cols}, expected {expected_rows}x{expected_cols}")]
    Mismatch { actual_rows: usize, actual_cols: usize, expected_rows: usize, expected_cols: usize },

    /// A device buffer does not hold the requested number of elements.
    #[error("device buffer holds {buffer_len} elements, cannot read back a {rows}x{cols} matrix")]
    BufferLength { buffer_len: usize, rows: usize, cols: usize },
}

/// Diagnostic text produced by the device compiler for a failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog(String);

impl BuildLog {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Decode a raw log buffer. Trailing NUL terminators are stripped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Self(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse classification of a [`GemmError`], used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Shape,
    Device,
    Build,
    Dispatch,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "io"),
            Self::Shape => write!(f, "shape"),
            Self::Device => write!(f, "device"),
            Self::Build => write!(f, "build"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Errors from any stage of the offload pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GemmError {
    /// A file could not be opened, read or written.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A matrix file is malformed (bad header, unparsable value).
    #[error("malformed matrix file '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// No usable platform/device, or context/queue creation failed.
    #[error("device error: {0}")]
    Device(String),

    /// The kernel source failed to compile. The full log is kept in `log`
    /// and is not part of the message.
    #[error("kernel '{entry_point}' failed to build ({} log lines)", .log.lines().count())]
    Build { entry_point: String, log: BuildLog },

    /// Argument binding, enqueue, transfer or completion failure.
    #[error("dispatch failed during {stage}: {reason}")]
    Dispatch { stage: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl GemmError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse { path: path.into(), reason: reason.into() }
    }

    pub fn dispatch(stage: &'static str, reason: impl fmt::Display) -> Self {
        Self::Dispatch { stage, reason: reason.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Parse { .. } => ErrorKind::Io,
            Self::Shape(_) => ErrorKind::Shape,
            Self::Device(_) => ErrorKind::Device,
            Self::Build { .. } => ErrorKind::Build,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The build log, if this is a build failure.
    pub fn build_log(&self) -> Option<&BuildLog> {
        match self {
            Self::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}
