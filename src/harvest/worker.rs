//! Harvest workers
//!
//! Each worker:
//! - Holds one pooled record source connection for its whole lifetime
//! - Walks its partition of the checkpoint index in order
//! - Renders each record through the shared service path
//! - Sends bytes to its sink, tagged with the shard sequence
//!
//! Per-record failures are isolated: a vanished record goes to the
//! not-found log and a record that fails to render goes to the fault log.
//! Negotiation errors and a source that stays unavailable through every
//! retry stop the worker.

use crate::error::{OutputError, ServiceError, WorkerError};
use crate::harvest::output::RecordSink;
use crate::negotiate::NegotiationRequest;
use crate::render::Representation;
use crate::service::Service;
use crate::source::{ConnectionFactory, ConnectionPool, Identifier, RecordSource, RetryPolicy};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Statistics collected by workers
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Records written to shards
    pub harvested: AtomicU64,

    /// Bytes of rendered output
    pub bytes: AtomicU64,

    /// Records that failed to render
    pub faults: AtomicU64,

    /// Records missing from the source
    pub not_found: AtomicU64,
}

impl WorkerStats {
    fn record_harvested(&self, bytes: u64) {
        self.harvested.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Records processed, whatever the outcome
    pub fn processed(&self) -> u64 {
        self.harvested.load(Ordering::Relaxed)
            + self.faults.load(Ordering::Relaxed)
            + self.not_found.load(Ordering::Relaxed)
    }
}

/// Settings shared by every worker of a register
#[derive(Clone)]
pub struct WorkerContext {
    pub service: Service,

    pub register: String,

    /// Harvest view; `None` uses the class default
    pub view: Option<String>,

    /// Harvest format (a concrete mimetype)
    pub format: String,

    /// Successful records per shard
    pub shard_threshold: usize,

    /// Retry policy for transient source errors
    pub retry: RetryPolicy,

    pub shutdown: Arc<AtomicBool>,
}

/// One worker's slice of the index
#[derive(Debug, Clone)]
pub struct HarvestTask {
    pub worker_id: usize,

    /// The whole checkpoint index
    pub identifiers: Arc<Vec<Identifier>>,

    /// Positions still to harvest
    pub range: Range<usize>,

    /// Shard sequence of the first record written
    pub start_seq: u32,
}

/// How a partition run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Every position of the range was processed
    Completed { written: u64 },

    /// The shutdown flag stopped the worker at a record boundary
    Interrupted { next_offset: usize },
}

/// Harvest a range of the index into `sink`
pub fn harvest_partition(
    ctx: &WorkerContext,
    task: &HarvestTask,
    source: &mut dyn RecordSource,
    sink: &mut dyn RecordSink,
    stats: &WorkerStats,
) -> Result<PartitionOutcome, WorkerError> {
    let id = task.worker_id;
    let threshold = ctx.shard_threshold.max(1) as u64;
    let request = NegotiationRequest::in_process(ctx.view.as_deref(), Some(&ctx.format));
    let output_err = |source: OutputError| WorkerError::Output { id, source };
    let mut written = 0u64;

    for offset in task.range.clone() {
        if ctx.shutdown.load(Ordering::Relaxed) {
            sink.finish(id, offset, false).map_err(output_err)?;
            info!(worker = id, register = %ctx.register, next_offset = offset, "Worker interrupted");
            return Ok(PartitionOutcome::Interrupted { next_offset: offset });
        }

        let identifier = &task.identifiers[offset];
        let seq = task.start_seq + (written / threshold) as u32;

        let result = ctx
            .retry
            .run(|| ctx.service.represent(&mut *source, &ctx.register, identifier, &request));

        match result {
            Ok(Representation::Serialized { body, .. }) => {
                let bytes = body.len() as u64;
                sink.record(id, seq, offset, body).map_err(output_err)?;
                written += 1;
                stats.record_harvested(bytes);
            }
            Ok(_) => {
                stats.record_fault();
                sink.fault(id, identifier, "representation was not serialized")
                    .map_err(output_err)?;
            }
            Err(ServiceError::NotFound { .. }) => {
                debug!(worker = id, id = %identifier, "Record not found");
                stats.record_not_found();
                sink.not_found(id, identifier).map_err(output_err)?;
            }
            Err(ServiceError::Negotiation(source)) => {
                let _ = sink.finish(id, offset, false);
                error!(worker = id, register = %ctx.register, error = %source, "Negotiation failed");
                return Err(WorkerError::Negotiation { id, source });
            }
            Err(ServiceError::Source(source)) if source.is_transient() || source.is_exhausted() => {
                let _ = sink.finish(id, offset, false);
                error!(worker = id, register = %ctx.register, error = %source, "Record source unavailable");
                return Err(WorkerError::SourceExhausted { id, source });
            }
            Err(e) => {
                warn!(worker = id, id = %identifier, error = %e, "Record faulted");
                stats.record_fault();
                sink.fault(id, identifier, &e.to_string()).map_err(output_err)?;
            }
        }
    }

    sink.finish(id, task.range.end, true).map_err(output_err)?;
    Ok(PartitionOutcome::Completed { written })
}

/// A worker thread harvesting one partition
pub struct HarvestWorker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<PartitionOutcome, WorkerError>>>,
}

impl HarvestWorker {
    /// Spawn a new worker thread
    pub fn spawn<F, S>(
        ctx: Arc<WorkerContext>,
        task: HarvestTask,
        pool: Arc<ConnectionPool<F>>,
        mut sink: S,
        stats: Arc<WorkerStats>,
    ) -> Result<Self, WorkerError>
    where
        F: ConnectionFactory,
        S: RecordSink + Send + 'static,
    {
        let id = task.worker_id;
        let handle = thread::Builder::new()
            .name(format!("harvest-{}-{}", ctx.register, id))
            .spawn(move || {
                let mut conn = match pool.acquire() {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(worker = id, error = %e, "Failed to acquire connection");
                        let _ = sink.finish(id, task.range.start, false);
                        return Err(WorkerError::SourceExhausted { id, source: e });
                    }
                };
                info!(
                    worker = id,
                    register = %ctx.register,
                    from = task.range.start,
                    to = task.range.end,
                    start_seq = task.start_seq,
                    "Worker starting"
                );
                harvest_partition(&ctx, &task, &mut *conn, &mut sink, &stats)
            })
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<PartitionOutcome, WorkerError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: "Worker thread panicked".into(),
                }),
            },
            None => Ok(PartitionOutcome::Completed { written: 0 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{gazetteer, EntityClass};
    use crate::error::{OutputResult, RenderError};
    use crate::negotiate::View;
    use crate::render::{EntityRenderer, FieldMappingBuilder, Graph, ViewBuilder};
    use crate::source::{MemorySource, MemoryStore, Record};
    use std::time::Duration;

    #[derive(Default)]
    struct VecSink {
        records: Vec<(u32, usize)>,
        faults: Vec<String>,
        not_found: Vec<String>,
        finished: Option<(usize, bool)>,
    }

    impl RecordSink for VecSink {
        fn record(&mut self, _: usize, seq: u32, offset: usize, _: Vec<u8>) -> OutputResult<()> {
            self.records.push((seq, offset));
            Ok(())
        }
        fn fault(&mut self, _: usize, id: &str, _: &str) -> OutputResult<()> {
            self.faults.push(id.to_string());
            Ok(())
        }
        fn not_found(&mut self, _: usize, id: &str) -> OutputResult<()> {
            self.not_found.push(id.to_string());
            Ok(())
        }
        fn finish(&mut self, _: usize, next_offset: usize, complete: bool) -> OutputResult<()> {
            self.finished = Some((next_offset, complete));
            Ok(())
        }
    }

    /// Fails for one identifier, maps fields otherwise
    struct FlakyBuilder(&'static str);

    impl ViewBuilder for FlakyBuilder {
        fn build(&self, class: &EntityClass, view: &View, uri: &str, record: &Record) -> Result<Graph, RenderError> {
            if record.id == self.0 {
                return Err(RenderError::Build {
                    view: view.token.clone(),
                    id: record.id.clone(),
                    reason: "geometry missing".into(),
                });
            }
            FieldMappingBuilder.build(class, view, uri, record)
        }
    }

    fn setup(n: usize, renderer: EntityRenderer) -> (WorkerContext, MemoryStore, Arc<Vec<Identifier>>) {
        let catalog = gazetteer::catalog();
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = format!("LOC{:04}", i);
            store.insert("locality", Record::new(id.as_str()).with("locality_name", "TOWN"));
            ids.push(id);
        }
        let ctx = WorkerContext {
            service: Service::new(Arc::new(catalog), Arc::new(renderer)),
            register: "locality".into(),
            view: None,
            format: "application/n-triples".into(),
            shard_threshold: 4,
            retry: RetryPolicy::new(1).with_base_delay(Duration::from_millis(1)),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        (ctx, store, Arc::new(ids))
    }

    fn task(ids: &Arc<Vec<Identifier>>, range: Range<usize>) -> HarvestTask {
        HarvestTask {
            worker_id: 0,
            identifiers: Arc::clone(ids),
            range,
            start_seq: 1,
        }
    }

    #[test]
    fn test_rotation_sequence() {
        let renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        let (ctx, store, ids) = setup(10, renderer);
        let mut sink = VecSink::default();
        let stats = WorkerStats::default();

        let outcome = harvest_partition(&ctx, &task(&ids, 0..10), &mut MemorySource::new(store), &mut sink, &stats)
            .unwrap();

        assert_eq!(outcome, PartitionOutcome::Completed { written: 10 });
        let seqs: Vec<u32> = sink.records.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        assert_eq!(sink.finished, Some((10, true)));
        assert_eq!(stats.harvested.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_fault_isolation() {
        let mut renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        renderer.register("gnaf", FlakyBuilder("LOC0003"));
        let (ctx, store, ids) = setup(8, renderer);
        let mut sink = VecSink::default();
        let stats = WorkerStats::default();

        let outcome = harvest_partition(&ctx, &task(&ids, 0..8), &mut MemorySource::new(store), &mut sink, &stats)
            .unwrap();

        assert_eq!(outcome, PartitionOutcome::Completed { written: 7 });
        assert_eq!(sink.records.len(), 7);
        assert_eq!(sink.faults, vec!["LOC0003".to_string()]);
        assert_eq!(stats.faults.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_not_found_and_broken_rows() {
        let renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        let (ctx, store, ids) = setup(5, renderer);
        store.remove("locality", "LOC0001");
        store.break_record("locality", "LOC0002");
        let mut sink = VecSink::default();
        let stats = WorkerStats::default();

        harvest_partition(&ctx, &task(&ids, 0..5), &mut MemorySource::new(store), &mut sink, &stats).unwrap();

        assert_eq!(sink.not_found, vec!["LOC0001".to_string()]);
        assert_eq!(sink.faults, vec!["LOC0002".to_string()]);
        assert_eq!(sink.records.len(), 3);
        assert_eq!(stats.processed(), 5);
    }

    #[test]
    fn test_negotiation_error_stops_worker() {
        let renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        let (mut ctx, store, ids) = setup(3, renderer);
        ctx.format = "application/pdf".into();
        let mut sink = VecSink::default();

        let err = harvest_partition(
            &ctx,
            &task(&ids, 0..3),
            &mut MemorySource::new(store),
            &mut sink,
            &WorkerStats::default(),
        )
        .unwrap_err();

        assert!(matches!(err, WorkerError::Negotiation { id: 0, .. }));
        assert_eq!(sink.finished, Some((0, false)));
    }

    #[test]
    fn test_shutdown_at_record_boundary() {
        let renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        let (ctx, store, ids) = setup(5, renderer);
        ctx.shutdown.store(true, Ordering::SeqCst);
        let mut sink = VecSink::default();

        let outcome = harvest_partition(
            &ctx,
            &task(&ids, 2..5),
            &mut MemorySource::new(store),
            &mut sink,
            &WorkerStats::default(),
        )
        .unwrap();

        assert_eq!(outcome, PartitionOutcome::Interrupted { next_offset: 2 });
        assert!(sink.records.is_empty());
        assert_eq!(sink.finished, Some((2, false)));
    }

    #[test]
    fn test_resumed_task_keeps_sequence() {
        let renderer = EntityRenderer::for_catalog(&gazetteer::catalog());
        let (ctx, store, ids) = setup(10, renderer);
        let mut sink = VecSink::default();
        let mut resumed = task(&ids, 8..10);
        resumed.start_seq = 3;

        harvest_partition(&ctx, &resumed, &mut MemorySource::new(store), &mut sink, &WorkerStats::default()).unwrap();
        assert_eq!(sink.records, vec![(3, 8), (3, 9)]);
    }
}
