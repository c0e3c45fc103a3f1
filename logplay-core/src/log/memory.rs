//! In-memory log provider
//!
//! Holds recorded streams keyed by file name and builds a [`LogIndex`] by
//! merging the included streams on timestamp. Each stream keeps its own
//! recorded order, so a stream that was captured out of order shows up as
//! out of order in the global sequence too.

use super::{LogIndex, LogLoader, SampleLocation, StreamId, StreamInfo, Timestamp};
use crate::error::{ReplayError, Result};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct RecordedStream {
    info: StreamInfo,
    samples: Vec<(Timestamp, Vec<u8>)>,
}

/// Recorded streams grouped by log file
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    files: BTreeMap<PathBuf, Vec<Arc<RecordedStream>>>,
}

impl MemoryLog {
    /// Create an empty log set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream recorded in `file`
    pub fn add_stream(
        &mut self,
        file: impl Into<PathBuf>,
        info: StreamInfo,
        samples: Vec<(Timestamp, Vec<u8>)>,
    ) -> &mut Self {
        self.files
            .entry(file.into())
            .or_default()
            .push(Arc::new(RecordedStream { info, samples }));
        self
    }

    /// Builder form of [`MemoryLog::add_stream`]
    pub fn with_stream(
        mut self,
        file: impl Into<PathBuf>,
        info: StreamInfo,
        samples: Vec<(Timestamp, Vec<u8>)>,
    ) -> Self {
        self.add_stream(file, info, samples);
        self
    }

    /// Names of all registered files
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }
}

impl LogLoader for MemoryLog {
    fn load(
        &self,
        files: &[PathBuf],
        include: &mut dyn FnMut(&StreamInfo) -> bool,
    ) -> Result<Arc<dyn LogIndex>> {
        let mut included = Vec::new();

        for file in files {
            let streams = self.files.get(file).ok_or_else(|| {
                ReplayError::Setup(format!("cannot open log file {}", file.display()))
            })?;

            for stream in streams {
                if include(&stream.info) {
                    included.push(Arc::clone(stream));
                } else {
                    debug!(stream = %stream.info.name, "Stream excluded from index");
                }
            }
        }

        Ok(Arc::new(MemoryLogIndex::build(included)))
    }
}

/// Global sample sequence over in-memory streams
#[derive(Debug)]
pub struct MemoryLogIndex {
    streams: Vec<Arc<RecordedStream>>,
    order: Vec<SampleLocation>,
}

impl MemoryLogIndex {
    fn build(streams: Vec<Arc<RecordedStream>>) -> Self {
        let total = streams.iter().map(|s| s.samples.len()).sum();
        let mut order = Vec::with_capacity(total);

        // k-way merge on (timestamp, stream, position); ties go to the lower stream id
        let mut heads = BinaryHeap::new();
        for (id, stream) in streams.iter().enumerate() {
            if let Some((ts, _)) = stream.samples.first() {
                heads.push(Reverse((*ts, id, 0usize)));
            }
        }

        while let Some(Reverse((timestamp, id, position))) = heads.pop() {
            order.push(SampleLocation {
                stream: StreamId(id),
                position,
                timestamp,
            });

            let next = position + 1;
            if let Some((ts, _)) = streams[id].samples.get(next) {
                heads.push(Reverse((*ts, id, next)));
            }
        }

        debug!(
            streams = streams.len(),
            samples = order.len(),
            "Built in-memory log index"
        );

        Self { streams, order }
    }
}

impl LogIndex for MemoryLogIndex {
    fn sample_count(&self) -> usize {
        self.order.len()
    }

    fn sample_at(&self, index: usize) -> Option<SampleLocation> {
        self.order.get(index).copied()
    }

    fn stream(&self, id: StreamId) -> Option<&StreamInfo> {
        self.streams.get(id.index()).map(|s| &s.info)
    }

    fn streams(&self) -> Vec<(StreamId, &StreamInfo)> {
        self.streams
            .iter()
            .enumerate()
            .map(|(id, s)| (StreamId(id), &s.info))
            .collect()
    }

    fn read_sample(&self, stream: StreamId, position: usize) -> Result<Vec<u8>> {
        self.streams
            .get(stream.index())
            .and_then(|s| s.samples.get(position))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| {
                ReplayError::invalid_argument(format!(
                    "no sample {} in stream {}",
                    position,
                    stream.index()
                ))
            })
    }
}
