//! Rotating shard files
//!
//! One writer per partition, one open file at a time. Records carry the
//! shard sequence they belong to; a higher sequence closes the current file
//! and opens the next, a lower one is refused. Every write is flushed.

use crate::error::{OutputError, OutputResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output file naming for one entity class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub dir: PathBuf,

    /// Entity class name, the file name prefix
    pub entity: String,

    /// Shard file extension (`ttl`, `nt`, `jsonld`)
    pub extension: String,
}

impl OutputLayout {
    pub fn new(dir: &Path, entity: &str, extension: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            entity: entity.to_string(),
            extension: extension.to_string(),
        }
    }

    /// `<entity>-<worker>-<seq>.<ext>`
    pub fn shard_path(&self, worker: usize, seq: u32) -> PathBuf {
        self.dir
            .join(format!("{}-{}-{}.{}", self.entity, worker, seq, self.extension))
    }

    /// `<entity>-<worker>.faults`
    pub fn fault_log(&self, worker: usize) -> PathBuf {
        self.dir.join(format!("{}-{}.faults", self.entity, worker))
    }

    /// `<entity>-<worker>.notfound`
    pub fn not_found_log(&self, worker: usize) -> PathBuf {
        self.dir.join(format!("{}-{}.notfound", self.entity, worker))
    }
}

/// Writes one partition's records into rotating shard files
pub struct ShardWriter {
    layout: OutputLayout,
    worker: usize,
    current: Option<BufWriter<File>>,
    current_seq: u32,
    records_in_shard: u64,
    shards_opened: u64,
    bytes_written: u64,
}

impl ShardWriter {
    pub fn new(layout: OutputLayout, worker: usize) -> Self {
        Self {
            layout,
            worker,
            current: None,
            current_seq: 0,
            records_in_shard: 0,
            shards_opened: 0,
            bytes_written: 0,
        }
    }

    /// Sequence of the open shard (0 before the first write)
    pub fn current_seq(&self) -> u32 {
        self.current_seq
    }

    pub fn records_in_shard(&self) -> u64 {
        self.records_in_shard
    }

    pub fn shards_opened(&self) -> u64 {
        self.shards_opened
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Check if a record for `seq` would close the open shard
    pub fn would_rotate(&self, seq: u32) -> bool {
        self.current.is_some() && seq > self.current_seq
    }

    /// Append one record to shard `seq`
    pub fn write(&mut self, seq: u32, body: &[u8]) -> OutputResult<()> {
        if seq < self.current_seq {
            return Err(OutputError::ShardRegressed {
                worker: self.worker,
                requested: seq,
                current: self.current_seq,
            });
        }
        if seq > self.current_seq || self.current.is_none() {
            self.open(seq)?;
        }

        let path = || self.layout.shard_path(self.worker, self.current_seq);
        let io_err = |source| OutputError::Io { path: path(), source };
        let Some(file) = self.current.as_mut() else {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "shard is not open",
            )));
        };

        file.write_all(body).map_err(io_err)?;
        let mut written = body.len() as u64;
        if !body.ends_with(b"\n") {
            file.write_all(b"\n").map_err(io_err)?;
            written += 1;
        }
        file.flush().map_err(io_err)?;

        self.records_in_shard += 1;
        self.bytes_written += written;
        Ok(())
    }

    /// Flush and close the open shard
    pub fn close(&mut self) -> OutputResult<()> {
        if let Some(mut file) = self.current.take() {
            file.flush().map_err(|source| OutputError::Io {
                path: self.layout.shard_path(self.worker, self.current_seq),
                source,
            })?;
        }
        Ok(())
    }

    fn open(&mut self, seq: u32) -> OutputResult<()> {
        self.close()?;
        let path = self.layout.shard_path(self.worker, seq);
        let file = File::create(&path).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(worker = self.worker, seq, path = %path.display(), "Opened shard");

        self.current = Some(BufWriter::new(file));
        self.current_seq = seq;
        self.records_in_shard = 0;
        self.shards_opened += 1;
        Ok(())
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
