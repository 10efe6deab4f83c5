//! Process-parallel execution
//!
//! The parent re-executes its own binary once per partition. A child harvests
//! exactly one partition and writes its shards, logs and progress marker
//! directly; the filesystem is the only coordination between processes.

use crate::config::HarvestConfig;
use crate::error::WorkerError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, error, info};

/// A running partition child
pub struct PartitionProcess {
    partition: usize,
    child: Child,
}

impl PartitionProcess {
    /// Spawn `program` with `args`
    pub fn spawn<I, S>(program: &Path, args: I, partition: usize) -> Result<Self, WorkerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        debug!(partition, program = %program.display(), ?args, "Spawning partition process");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| WorkerError::InitFailed {
                id: partition,
                reason: format!("cannot start '{}': {}", program.display(), e),
            })?;

        Ok(Self { partition, child })
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Process ID of the child
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the child; a non-zero exit is an error
    pub fn wait(mut self) -> Result<(), WorkerError> {
        let status: ExitStatus = self.child.wait().map_err(|e| WorkerError::ProcessFailed {
            id: self.partition,
            status: e.to_string(),
        })?;

        if status.success() {
            debug!(partition = self.partition, "Partition process finished");
            Ok(())
        } else {
            error!(partition = self.partition, %status, "Partition process failed");
            Err(WorkerError::ProcessFailed {
                id: self.partition,
                status: status.to_string(),
            })
        }
    }
}

/// Path of the running binary, re-executed for each partition
pub fn current_program() -> Result<PathBuf, WorkerError> {
    std::env::current_exe().map_err(|e| WorkerError::InitFailed {
        id: 0,
        reason: format!("cannot locate own executable: {}", e),
    })
}

/// Run one child per partition of `register` and wait for all of them
///
/// Returns the errors of the children that failed.
pub fn run_partitions(
    program: &Path,
    config: &HarvestConfig,
    register: &str,
    partitions: &[usize],
) -> Vec<WorkerError> {
    let mut running = Vec::with_capacity(partitions.len());
    let mut failures = Vec::new();

    for &index in partitions {
        match PartitionProcess::spawn(program, config.child_args(register, index), index) {
            Ok(process) => {
                info!(register, partition = index, pid = process.pid(), "Partition process started");
                running.push(process);
            }
            Err(e) => {
                error!(register, partition = index, error = %e, "Failed to start partition process");
                failures.push(e);
            }
        }
    }

    for process in running {
        if let Err(e) = process.wait() {
            failures.push(e);
        }
    }
    failures
}
