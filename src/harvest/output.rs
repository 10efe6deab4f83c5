//! Partition output: shards, fault logs and progress markers
//!
//! [`PartitionOutput`] owns everything one partition writes. In the thread
//! model the per-register output thread owns one per worker and feeds them
//! from the output queue; in the process model a child writes to its own
//! directly.
//!
//! # Thread model
//!
//! ```text
//!   worker 0 ──┐                       ┌──► PartitionOutput 0
//!   worker 1 ──┼──► OutputQueue ──► output thread ──► PartitionOutput 1
//!   worker N ──┘    (bounded)          └──► PartitionOutput N
//! ```

use crate::error::{OutputError, OutputResult};
use crate::harvest::queue::{OutputMessage, OutputReceiver, OutputSender};
use crate::harvest::resume::{PartitionProgress, ProgressStore};
use crate::harvest::shard::{OutputLayout, ShardWriter};
use chrono::Utc;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Where a worker's results go
pub trait RecordSink {
    /// A rendered record for shard `seq`, from index position `offset`
    fn record(&mut self, worker: usize, seq: u32, offset: usize, body: Vec<u8>) -> OutputResult<()>;

    /// A record that failed to render
    fn fault(&mut self, worker: usize, id: &str, summary: &str) -> OutputResult<()>;

    /// A record that vanished after indexing
    fn not_found(&mut self, worker: usize, id: &str) -> OutputResult<()>;

    /// The worker stopped at `next_offset`
    fn finish(&mut self, worker: usize, next_offset: usize, complete: bool) -> OutputResult<()>;
}

/// Counts of what was written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputTotals {
    pub records: u64,
    pub bytes: u64,
    pub shards: u64,
    pub faults: u64,
    pub not_found: u64,
}

impl AddAssign for OutputTotals {
    fn add_assign(&mut self, other: Self) {
        self.records += other.records;
        self.bytes += other.bytes;
        self.shards += other.shards;
        self.faults += other.faults;
        self.not_found += other.not_found;
    }
}

/// An append-only log, opened on first use
struct LazyLog {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl LazyLog {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn append(&mut self, line: &str) -> OutputResult<()> {
        let io_err = |source| OutputError::Io {
            path: self.path.clone(),
            source,
        };
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(io_err)?;
            self.file = Some(BufWriter::new(file));
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", line).map_err(io_err)?;
            file.flush().map_err(io_err)?;
        }
        Ok(())
    }
}

/// Shards, logs and the progress marker of one partition
pub struct PartitionOutput {
    entity: String,
    progress: PartitionProgress,
    store: ProgressStore,
    shards: ShardWriter,
    faults: LazyLog,
    not_found: LazyLog,
    totals: OutputTotals,
    finished: bool,
}

impl PartitionOutput {
    /// Prepare output for a partition starting at `progress`
    pub fn open(layout: &OutputLayout, store: ProgressStore, progress: PartitionProgress) -> OutputResult<Self> {
        std::fs::create_dir_all(&layout.dir).map_err(|source| OutputError::Io {
            path: layout.dir.clone(),
            source,
        })?;
        let worker = progress.worker_id;
        Ok(Self {
            entity: layout.entity.clone(),
            shards: ShardWriter::new(layout.clone(), worker),
            faults: LazyLog::new(layout.fault_log(worker)),
            not_found: LazyLog::new(layout.not_found_log(worker)),
            progress,
            store,
            totals: OutputTotals::default(),
            finished: false,
        })
    }

    pub fn worker(&self) -> usize {
        self.progress.worker_id
    }

    pub fn progress(&self) -> &PartitionProgress {
        &self.progress
    }

    pub fn totals(&self) -> OutputTotals {
        OutputTotals {
            bytes: self.shards.bytes_written(),
            shards: self.shards.shards_opened(),
            ..self.totals
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn check_worker(&self, worker: usize) -> OutputResult<()> {
        if worker == self.progress.worker_id {
            Ok(())
        } else {
            Err(OutputError::UnknownWorker(worker))
        }
    }

    fn save_progress(&mut self) -> OutputResult<()> {
        self.progress.updated_at = Utc::now();
        self.store.save(&self.entity, &self.progress)?;
        Ok(())
    }
}

impl RecordSink for PartitionOutput {
    fn record(&mut self, worker: usize, seq: u32, offset: usize, body: Vec<u8>) -> OutputResult<()> {
        self.check_worker(worker)?;

        // Everything before `offset` is already on disk in closed shards
        if self.shards.would_rotate(seq) {
            self.progress.next_offset = offset;
            self.progress.next_shard_seq = seq;
            self.save_progress()?;
            debug!(worker, seq, offset, "Rotating shard");
        }

        self.shards.write(seq, &body)?;
        self.progress.records_written += 1;
        self.totals.records += 1;
        Ok(())
    }

    fn fault(&mut self, worker: usize, id: &str, summary: &str) -> OutputResult<()> {
        self.check_worker(worker)?;
        let summary: String = summary
            .chars()
            .map(|c| if c == '\n' || c == '\t' || c == '\r' { ' ' } else { c })
            .collect();
        self.faults.append(&format!("{}\t{}", id, summary))?;
        self.totals.faults += 1;
        Ok(())
    }

    fn not_found(&mut self, worker: usize, id: &str) -> OutputResult<()> {
        self.check_worker(worker)?;
        self.not_found.append(id)?;
        self.totals.not_found += 1;
        Ok(())
    }

    fn finish(&mut self, worker: usize, next_offset: usize, complete: bool) -> OutputResult<()> {
        self.check_worker(worker)?;

        // A partly filled shard is closed for good; resume in the next one
        let next_seq = if self.shards.records_in_shard() > 0 {
            self.shards.current_seq() + 1
        } else {
            self.progress.next_shard_seq.max(self.shards.current_seq())
        };

        self.shards.close()?;
        self.progress.next_offset = next_offset;
        self.progress.next_shard_seq = next_seq;
        self.progress.complete = complete;
        self.save_progress()?;
        self.finished = true;

        debug!(
            worker,
            next_offset,
            next_shard_seq = next_seq,
            complete,
            "Partition output finished"
        );
        Ok(())
    }
}

/// Sends a worker's results to the output thread
pub struct QueueSink {
    sender: OutputSender,
}

impl QueueSink {
    pub fn new(sender: OutputSender) -> Self {
        Self { sender }
    }
}

impl RecordSink for QueueSink {
    fn record(&mut self, worker: usize, seq: u32, offset: usize, body: Vec<u8>) -> OutputResult<()> {
        self.sender.send(OutputMessage::Record {
            worker,
            seq,
            offset,
            body,
        })
    }

    fn fault(&mut self, worker: usize, id: &str, summary: &str) -> OutputResult<()> {
        self.sender.send(OutputMessage::Fault {
            worker,
            id: id.to_string(),
            summary: summary.to_string(),
        })
    }

    fn not_found(&mut self, worker: usize, id: &str) -> OutputResult<()> {
        self.sender.send(OutputMessage::NotFound {
            worker,
            id: id.to_string(),
        })
    }

    fn finish(&mut self, worker: usize, next_offset: usize, complete: bool) -> OutputResult<()> {
        self.sender.send(OutputMessage::Finish {
            worker,
            next_offset,
            complete,
        })
    }
}

/// The per-register output thread
pub struct OutputWriter {
    register: String,
    handle: Option<JoinHandle<OutputResult<OutputTotals>>>,
}

impl OutputWriter {
    /// Spawn a thread draining `receiver` into `outputs`
    pub fn spawn(
        register: &str,
        dir: &Path,
        outputs: Vec<PartitionOutput>,
        receiver: OutputReceiver,
    ) -> OutputResult<Self> {
        let name = register.to_string();
        let handle = thread::Builder::new()
            .name(format!("output-{}", register))
            .spawn(move || output_loop(&name, outputs, receiver))
            .map_err(|source| OutputError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        Ok(Self {
            register: register.to_string(),
            handle: Some(handle),
        })
    }

    /// Wait for the thread; returns once every sender is dropped
    pub fn join(mut self) -> OutputResult<OutputTotals> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    error!(register = %self.register, "Output thread panicked");
                    Err(OutputError::Panicked)
                }
            },
            None => Ok(OutputTotals::default()),
        }
    }
}

fn output_loop(register: &str, outputs: Vec<PartitionOutput>, receiver: OutputReceiver) -> OutputResult<OutputTotals> {
    let mut outputs: HashMap<usize, PartitionOutput> = outputs.into_iter().map(|o| (o.worker(), o)).collect();

    while let Some(message) = receiver.recv() {
        let worker = message.worker();
        let output = outputs
            .get_mut(&worker)
            .ok_or(OutputError::UnknownWorker(worker))?;

        let result = match message {
            OutputMessage::Record {
                worker,
                seq,
                offset,
                body,
            } => output.record(worker, seq, offset, body),
            OutputMessage::Fault { worker, id, summary } => output.fault(worker, &id, &summary),
            OutputMessage::NotFound { worker, id } => output.not_found(worker, &id),
            OutputMessage::Finish {
                worker,
                next_offset,
                complete,
            } => output.finish(worker, next_offset, complete),
        };

        if let Err(e) = result {
            error!(register, worker, error = %e, "Output failed");
            return Err(e);
        }
    }

    let mut totals = OutputTotals::default();
    for output in outputs.values() {
        totals += output.totals();
    }
    info!(
        register,
        records = totals.records,
        shards = totals.shards,
        faults = totals.faults,
        not_found = totals.not_found,
        "Output thread finished"
    );
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::checkpoint::IndexStamp;
    use crate::harvest::partition::partition;
    use crate::harvest::queue::OutputQueue;
    use std::fs;
    use tempfile::TempDir;

    fn output(dir: &TempDir, worker: usize) -> (PartitionOutput, ProgressStore) {
        let layout = OutputLayout::new(dir.path(), "address", "nt");
        let store = ProgressStore::new(dir.path());
        let parts = partition(2500, 4);
        let index = IndexStamp {
            count: 2500,
            created_at: chrono::Utc::now(),
        };
        let progress = PartitionProgress::fresh("address", &parts[worker], 4, index);
        (PartitionOutput::open(&layout, store.clone(), progress).unwrap(), store)
    }

    #[test]
    fn test_marker_saved_at_rotation() {
        let dir = TempDir::new().unwrap();
        let (mut out, store) = output(&dir, 0);

        out.record(0, 1, 0, b"a\n".to_vec()).unwrap();
        out.record(0, 1, 1, b"b\n".to_vec()).unwrap();
        assert!(store.load("address", 0).unwrap().is_none());

        out.record(0, 2, 2, b"c\n".to_vec()).unwrap();
        let marker = store.load("address", 0).unwrap().unwrap();
        assert_eq!(marker.next_offset, 2);
        assert_eq!(marker.next_shard_seq, 2);
        assert_eq!(marker.records_written, 2);
    }

    #[test]
    fn test_finish_moves_past_partial_shard() {
        let dir = TempDir::new().unwrap();
        let (mut out, store) = output(&dir, 1);

        out.record(1, 1, 625, b"a\n".to_vec()).unwrap();
        out.finish(1, 626, false).unwrap();

        let marker = store.load("address", 1).unwrap().unwrap();
        assert_eq!(marker.next_offset, 626);
        assert_eq!(marker.next_shard_seq, 2);
        assert!(!marker.complete);
        assert!(out.is_finished());
    }

    #[test]
    fn test_fault_and_not_found_logs() {
        let dir = TempDir::new().unwrap();
        let (mut out, _) = output(&dir, 2);
        out.fault(2, "GAACT1", "Failed to build\nview").unwrap();
        out.not_found(2, "GAACT2").unwrap();

        let faults = fs::read_to_string(dir.path().join("address-2.faults")).unwrap();
        assert_eq!(faults, "GAACT1\tFailed to build view\n");
        let missing = fs::read_to_string(dir.path().join("address-2.notfound")).unwrap();
        assert_eq!(missing, "GAACT2\n");
        assert_eq!(out.totals().faults, 1);
        assert_eq!(out.totals().not_found, 1);
    }

    #[test]
    fn test_rejects_foreign_worker() {
        let dir = TempDir::new().unwrap();
        let (mut out, _) = output(&dir, 0);
        assert!(matches!(
            out.record(3, 1, 0, Vec::new()),
            Err(OutputError::UnknownWorker(3))
        ));
    }

    #[test]
    fn test_output_thread_routes_by_worker() {
        let dir = TempDir::new().unwrap();
        let (out0, _) = output(&dir, 0);
        let (out1, _) = output(&dir, 1);
        let (sender, receiver) = OutputQueue::new(8).split();
        let writer = OutputWriter::spawn("address", dir.path(), vec![out0, out1], receiver).unwrap();

        let mut sink0 = QueueSink::new(sender.clone());
        let mut sink1 = QueueSink::new(sender);
        sink0.record(0, 1, 0, b"zero\n".to_vec()).unwrap();
        sink1.record(1, 1, 625, b"one\n".to_vec()).unwrap();
        sink1.not_found(1, "GAACT9").unwrap();
        sink0.finish(0, 1, false).unwrap();
        sink1.finish(1, 626, false).unwrap();
        drop(sink0);
        drop(sink1);

        let totals = writer.join().unwrap();
        assert_eq!(totals.records, 2);
        assert_eq!(totals.not_found, 1);
        assert_eq!(totals.shards, 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("address-1-1.nt")).unwrap(),
            "one\n"
        );
    }
}
