//! Error taxonomy shared by every layer of the service.
//!
//! Caller errors (`IndexOutOfRange`, `ShapeMismatch`, `InvalidName`) leave
//! state untouched. `DeviceWriteFailure` leaves the in-memory buffer as set so
//! the push can be retried with [`crate::matrix::Matrix::refresh`].

use std::fmt;

/// Which axis an out-of-range index was given for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => f.write_str("row"),
            Axis::Column => f.write_str("column"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JumbotronError {
    #[error("{axis} {index} is out of range (display has {limit})")]
    IndexOutOfRange { axis: Axis, index: usize, limit: usize },

    #[error("expected a {expected_rows}x{expected_columns} grid, got {rows} rows (row lengths: {columns:?})")]
    ShapeMismatch {
        expected_rows: usize,
        expected_columns: usize,
        rows: usize,
        columns: Vec<usize>,
    },

    #[error("cannot read source: {0}")]
    SourceUnreadable(String),

    #[error("LED strip write failed: {0}")]
    DeviceWriteFailure(String),

    #[error("observer is gone or not keeping up")]
    ObserverDeliveryFailure,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("stored state is not valid JSON: {0}")]
    CorruptState(#[from] serde_json::Error),

    #[error("no saved snapshot named {0}")]
    SnapshotNotFound(String),

    #[error("invalid snapshot name: {0:?}")]
    InvalidName(String),

    #[error("video file not found: {0}")]
    VideoMissing(String),

    #[error("cannot spawn worker thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, JumbotronError>;

impl JumbotronError {
    /// Errors caused by bad input rather than by the device or the disk.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            JumbotronError::IndexOutOfRange { .. }
                | JumbotronError::ShapeMismatch { .. }
                | JumbotronError::SourceUnreadable(_)
                | JumbotronError::InvalidName(_)
        )
    }
}
