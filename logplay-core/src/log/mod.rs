//! Log index interface
//!
//! The replay engine does not parse log files itself. A [`LogLoader`] turns a
//! set of files into a [`LogIndex`]: a globally time-ordered sequence of
//! sample locations across every included stream.
//!
//! Stream inclusion is decided while the index is built. The loader calls the
//! inclusion predicate once per discovered stream; streams rejected there
//! never occupy a slot in the global sequence.

mod memory;

pub use memory::{MemoryLog, MemoryLogIndex};

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Capture time of a sample, in microseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from microseconds since the epoch
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Create a timestamp from milliseconds since the epoch
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    /// Microseconds since the epoch
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Signed distance to an earlier timestamp in microseconds.
    ///
    /// Negative when `earlier` is actually later.
    pub fn micros_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Convert to a UTC date-time, if representable
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y%m%d-%H:%M:%S%.6f")),
            None => write!(f, "{}us", self.0),
        }
    }
}

/// Position of a stream within a built index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub usize);

impl StreamId {
    /// Index into per-stream tables
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Metadata of one recorded stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream identity, `<task>.<port>`
    pub name: String,

    /// Name of the recorded sample type
    pub type_name: String,

    /// Model of the task that produced the stream, when the log carries it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_model: Option<String>,
}

impl StreamInfo {
    /// Create stream metadata without a task model
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            task_model: None,
        }
    }

    /// Attach the producing task model
    pub fn with_task_model(mut self, model: impl Into<String>) -> Self {
        self.task_model = Some(model.into());
        self
    }

    /// Task and port portion of the stream name
    pub fn split_name(&self) -> Option<(&str, &str)> {
        split_stream_name(&self.name)
    }
}

/// Where a global sample lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    /// Owning stream
    pub stream: StreamId,
    /// Position within the stream
    pub position: usize,
    /// Capture time
    pub timestamp: Timestamp,
}

/// Split `<task>.<port>` into its task and port names.
///
/// The port is everything after the last dot; a leading `/` on the task is
/// dropped. Returns `None` when either part would be empty.
pub fn split_stream_name(name: &str) -> Option<(&str, &str)> {
    let (task, port) = name.trim_start_matches('/').rsplit_once('.')?;
    if task.is_empty() || port.is_empty() {
        return None;
    }
    Some((task, port))
}

/// Time-ordered index over the samples of all included streams
pub trait LogIndex: Send + Sync {
    /// Number of samples in the global sequence
    fn sample_count(&self) -> usize;

    /// Location of the sample at `index` in the global sequence
    fn sample_at(&self, index: usize) -> Option<SampleLocation>;

    /// Metadata of an included stream
    fn stream(&self, id: StreamId) -> Option<&StreamInfo>;

    /// All included streams, ordered by id
    fn streams(&self) -> Vec<(StreamId, &StreamInfo)>;

    /// Raw bytes of one recorded sample
    fn read_sample(&self, stream: StreamId, position: usize) -> Result<Vec<u8>>;

    /// Timestamp of the sample at `index` in the global sequence
    fn timestamp_at(&self, index: usize) -> Option<Timestamp> {
        self.sample_at(index).map(|loc| loc.timestamp)
    }
}

/// Builds a [`LogIndex`] from log files
pub trait LogLoader: Send + Sync {
    /// Index `files`, asking `include` once per discovered stream.
    ///
    /// # Errors
    ///
    /// Fails when a file cannot be read or the index cannot be built.
    fn load(
        &self,
        files: &[PathBuf],
        include: &mut dyn FnMut(&StreamInfo) -> bool,
    ) -> Result<Arc<dyn LogIndex>>;
}
