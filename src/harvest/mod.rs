//! Register harvesting
//!
//! - `walker`: page through a register's listing view
//! - `checkpoint`: persist the enumerated identifiers
//! - `partition`: split the index among workers
//! - `worker`: render each identifier through the service
//! - `queue`, `output`, `shard`: get rendered bytes into rotating files
//! - `resume`: per-partition progress markers
//! - `orchestrator`, `process`: drive registers with threads or processes

pub mod checkpoint;
pub mod orchestrator;
pub mod output;
pub mod partition;
pub mod process;
pub mod queue;
pub mod resume;
pub mod shard;
pub mod walker;
pub mod worker;

pub use checkpoint::{CheckpointIndex, CheckpointStore, IndexStamp};
pub use orchestrator::{HarvestReport, Orchestrator, RegisterOutcome, RegisterReport};
pub use output::{OutputTotals, PartitionOutput, RecordSink};
pub use partition::{partition, WorkPartition};
pub use resume::{PartitionProgress, ProgressStore};
pub use shard::{OutputLayout, ShardWriter};
pub use walker::{enumerate_register, PageSource, RegisterWalker, ServicePages};
pub use worker::{harvest_partition, HarvestTask, PartitionOutcome, WorkerContext, WorkerStats};
