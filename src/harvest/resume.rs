//! Per-partition progress markers
//!
//! A marker records where a partition's worker should pick up again: the
//! next index position to harvest and the shard sequence to (re)write from
//! empty. It is saved before each shard rotation, on a graceful interrupt
//! and when the partition ends, always atomically.
//!
//! ```text
//!   shard 1 (600)      shard 2 (600)      shard 3 ...
//!   [0 ........ 599]  [600 ...... 1199]  [1200 ..
//!                                         ^
//!                     marker: next_offset = 1200, next_shard_seq = 3
//! ```
//!
//! Resuming from that marker truncates shard 3 and starts at 1200, so no
//! record is written twice. A marker is only trusted for the index build
//! it was written against: positions in a rebuilt index name different
//! identifiers.

use crate::error::CheckpointError;
use crate::harvest::checkpoint::{write_atomic, IndexStamp};
use crate::harvest::partition::WorkPartition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Resume position of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProgress {
    pub register: String,
    pub worker_id: usize,

    /// Worker count of the run that wrote the marker
    pub worker_count: usize,

    /// Index build the positions refer to
    pub index: IndexStamp,

    /// Partition start position
    pub start: usize,

    /// Partition length
    pub len: usize,

    /// Next index position to harvest
    pub next_offset: usize,

    /// Shard sequence the next record goes to
    pub next_shard_seq: u32,

    /// Records written to shards so far
    pub records_written: u64,

    /// The partition ran to its end
    pub complete: bool,

    pub updated_at: DateTime<Utc>,
}

impl PartitionProgress {
    /// A marker for a partition that has not started
    pub fn fresh(register: &str, partition: &WorkPartition, worker_count: usize, index: IndexStamp) -> Self {
        Self {
            register: register.to_string(),
            worker_id: partition.worker_id,
            worker_count,
            index,
            start: partition.range.start,
            len: partition.len(),
            next_offset: partition.range.start,
            next_shard_seq: 1,
            records_written: 0,
            complete: false,
            updated_at: Utc::now(),
        }
    }

    /// Check the marker was written for the same split of the same index
    pub fn matches(&self, partition: &WorkPartition, worker_count: usize, index: &IndexStamp) -> bool {
        self.worker_id == partition.worker_id
            && self.worker_count == worker_count
            && self.index == *index
            && self.start == partition.range.start
            && self.len == partition.len()
            && (self.start..=self.end()).contains(&self.next_offset)
            && self.next_shard_seq >= 1
    }

    /// One past the last position of the partition
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Positions still to harvest
    pub fn remaining(&self) -> std::ops::Range<usize> {
        self.next_offset..self.end()
    }
}

/// Reads and writes markers as `<entity>-<worker>.progress.json`
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
}

impl ProgressStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, entity: &str, worker: usize) -> PathBuf {
        self.dir.join(format!("{}-{}.progress.json", entity, worker))
    }

    pub fn load(&self, entity: &str, worker: usize) -> Result<Option<PartitionProgress>, CheckpointError> {
        let path = self.path_for(entity, worker);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    pub fn save(&self, entity: &str, progress: &PartitionProgress) -> Result<(), CheckpointError> {
        let path = self.path_for(entity, progress.worker_id);
        write_atomic(&path, &serde_json::to_vec_pretty(progress)?)
    }

    /// Where a partition should start this run
    ///
    /// With `restart`, or when the marker is missing, unreadable or belongs
    /// to a different split or index build, the partition starts from the
    /// beginning.
    pub fn resume_point(
        &self,
        entity: &str,
        register: &str,
        partition: &WorkPartition,
        worker_count: usize,
        index: IndexStamp,
        restart: bool,
    ) -> PartitionProgress {
        let fresh = || PartitionProgress::fresh(register, partition, worker_count, index);
        if restart {
            return fresh();
        }

        match self.load(entity, partition.worker_id) {
            Ok(Some(progress)) if progress.matches(partition, worker_count, &index) => {
                if progress.next_offset > partition.range.start {
                    info!(
                        register,
                        worker = partition.worker_id,
                        next_offset = progress.next_offset,
                        next_shard_seq = progress.next_shard_seq,
                        complete = progress.complete,
                        "Resuming partition"
                    );
                }
                progress
            }
            Ok(Some(progress)) => {
                warn!(
                    register,
                    worker = partition.worker_id,
                    marker_workers = progress.worker_count,
                    marker_index = progress.index.count,
                    marker_index_built = %progress.index.created_at,
                    "Progress marker belongs to a different split or index, starting over"
                );
                fresh()
            }
            Ok(None) => fresh(),
            Err(e) => {
                warn!(register, worker = partition.worker_id, error = %e, "Unreadable progress marker, starting over");
                fresh()
            }
        }
    }
}
