//! Harvest orchestration
//!
//! ```text
//!   DISCOVER_REGISTERS
//!        │
//!        ├──► register A: LOAD_INDEX ─► PARTITION ─► SPAWN_WORKERS ─► AWAIT
//!        ├──► register B: LOAD_INDEX ─► PARTITION ─► SPAWN_WORKERS ─► AWAIT
//!        └──► ...
//!        │
//!       DONE
//! ```
//!
//! Registers are harvested concurrently, one coordinating thread each. A
//! register fails on its own: the others carry on and the report records
//! which ones did not finish.

use crate::catalog::{EntityClass, RegisterDescriptor};
use crate::config::{ExecutionModel, HarvestConfig};
use crate::error::{ConfigError, HarvestError, WalkError, WorkerError};
use crate::harvest::checkpoint::{CheckpointIndex, CheckpointStore, IndexStamp};
use crate::harvest::output::{OutputTotals, OutputWriter, PartitionOutput, QueueSink};
use crate::harvest::partition::{partition, WorkPartition};
use crate::harvest::process;
use crate::harvest::queue::OutputQueue;
use crate::harvest::resume::ProgressStore;
use crate::harvest::shard::OutputLayout;
use crate::harvest::walker::{enumerate_register, ServicePages};
use crate::harvest::worker::{harvest_partition, HarvestTask, HarvestWorker, PartitionOutcome, WorkerContext, WorkerStats};
use crate::negotiate::{NegotiationRequest, INTERNAL_FORMAT, LISTING_VIEW};
use crate::render::{extension_for, Representation};
use crate::service::Service;
use crate::source::{ConnectionFactory, ConnectionPool, Identifier, RecordSource, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How a register's harvest ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Every partition ran to its end
    Completed,

    /// Stopped by the shutdown flag; progress markers allow resuming
    Interrupted,

    /// The register could not be harvested
    Failed(String),
}

impl RegisterOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RegisterOutcome::Failed(_))
    }
}

/// Result of harvesting one register
#[derive(Debug, Clone)]
pub struct RegisterReport {
    pub register: String,
    pub outcome: RegisterOutcome,

    /// Identifiers in the checkpoint index
    pub index_len: usize,

    /// What this run wrote
    pub totals: OutputTotals,

    pub duration: Duration,
}

/// Result of a whole harvest
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub registers: Vec<RegisterReport>,
    pub duration: Duration,
}

impl HarvestReport {
    /// True if any register failed outright
    pub fn any_failed(&self) -> bool {
        self.registers.iter().any(|r| r.outcome.is_failure())
    }

    /// True if any register stopped early on the shutdown flag
    pub fn interrupted(&self) -> bool {
        self.registers
            .iter()
            .any(|r| r.outcome == RegisterOutcome::Interrupted)
    }

    /// Output totals over every register
    pub fn totals(&self) -> OutputTotals {
        let mut totals = OutputTotals::default();
        for report in &self.registers {
            totals += report.totals;
        }
        totals
    }

    pub fn index_len(&self) -> usize {
        self.registers.iter().map(|r| r.index_len).sum()
    }
}

/// Drives discovery, indexing and the workers of every register
pub struct Orchestrator<F: ConnectionFactory> {
    config: HarvestConfig,
    service: Service,
    pool: Arc<ConnectionPool<F>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
}

impl<F: ConnectionFactory> Orchestrator<F> {
    /// Create an orchestrator with a connection pool sized for the run
    pub fn new(config: HarvestConfig, service: Service, factory: F) -> Self {
        let registers = if config.register.is_some() {
            1
        } else {
            service.catalog().registers.len()
        };
        let max_connections = config.connection_budget(registers);
        let retry = RetryPolicy::new(config.retry_count);

        info!(
            source = %factory.describe(),
            max_connections,
            workers = config.worker_count,
            "Connection pool configured"
        );

        Self {
            pool: Arc::new(ConnectionPool::new(factory, max_connections, retry)),
            config,
            service,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Get a handle to the shutdown flag
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Counters shared by every worker of the run
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<F>> {
        &self.pool
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Registers to harvest, from the register of registers
    ///
    /// Listed registers unknown to the catalog are skipped. A selected
    /// register that is not listed is a configuration error.
    pub fn discover(&self) -> Result<Vec<String>, HarvestError> {
        let request = NegotiationRequest::in_process(Some(LISTING_VIEW), Some(INTERNAL_FORMAT));
        let items = match self.service.list_registers(&request)? {
            Representation::Listing(items) => items,
            _ => {
                return Err(WalkError::UnexpectedRepresentation {
                    register: self.service.catalog().uri.clone(),
                    page: 1,
                }
                .into())
            }
        };

        let mut names = Vec::with_capacity(items.len());
        for item in items {
            if self.service.lookup(&item.identifier).is_ok() {
                names.push(item.identifier);
            } else {
                warn!(register = %item.identifier, uri = %item.uri, "Skipping register missing from catalog");
            }
        }

        match &self.config.register {
            Some(selected) if names.contains(selected) => Ok(vec![selected.clone()]),
            Some(selected) => Err(ConfigError::UnknownRegister {
                name: selected.clone(),
                known: self.service.catalog().register_names(),
            }
            .into()),
            None => Ok(names),
        }
    }

    /// Harvest every discovered register concurrently
    pub fn run(&self) -> Result<HarvestReport, HarvestError> {
        let started = Instant::now();
        let registers = self.discover()?;
        info!(registers = registers.len(), model = ?self.config.model, "Starting harvest");

        let reports = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(registers.len());
            for register in &registers {
                let spawned = thread::Builder::new()
                    .name(format!("register-{}", register))
                    .spawn_scoped(scope, move || self.run_register(register));
                handles.push((register, spawned));
            }

            handles
                .into_iter()
                .map(|(register, spawned)| {
                    let failed = |reason: String| RegisterReport {
                        register: register.clone(),
                        outcome: RegisterOutcome::Failed(reason),
                        index_len: 0,
                        totals: OutputTotals::default(),
                        duration: Duration::ZERO,
                    };
                    match spawned {
                        Ok(handle) => handle
                            .join()
                            .unwrap_or_else(|_| failed("register thread panicked".to_string())),
                        Err(e) => failed(format!("cannot spawn register thread: {}", e)),
                    }
                })
                .collect::<Vec<_>>()
        });

        Ok(HarvestReport {
            registers: reports,
            duration: started.elapsed(),
        })
    }

    /// Harvest one register; failures end up in the report
    pub fn run_register(&self, register: &str) -> RegisterReport {
        let started = Instant::now();
        let (outcome, index_len, totals) = match self.harvest_register(register) {
            Ok(result) => result,
            Err(e) => {
                error!(register, error = %e, "Register harvest failed");
                (RegisterOutcome::Failed(e.to_string()), 0, OutputTotals::default())
            }
        };

        info!(
            register,
            outcome = ?outcome,
            records = totals.records,
            faults = totals.faults,
            not_found = totals.not_found,
            "Register finished"
        );

        RegisterReport {
            register: register.to_string(),
            outcome,
            index_len,
            totals,
            duration: started.elapsed(),
        }
    }

    /// Harvest a single partition into its own files (child process mode)
    pub fn run_partition(&self, register: &str, index: usize) -> Result<RegisterReport, HarvestError> {
        let started = Instant::now();
        let (descriptor, class) = self.service.lookup(register)?;
        let extension = self.preflight(register)?;
        let checkpoint = self.load_index(descriptor, class, false)?;
        let parts = partition(checkpoint.len(), self.config.worker_count);
        let part = parts.get(index).ok_or_else(|| WorkerError::InitFailed {
            id: index,
            reason: format!("register '{}' has {} partitions", register, parts.len()),
        })?;

        let dir = &self.config.output_dir;
        let store = ProgressStore::new(dir);
        let progress = store.resume_point(
            &class.name,
            register,
            part,
            parts.len(),
            checkpoint.stamp(),
            self.config.restart,
        );
        let index_len = checkpoint.len();

        let (outcome, totals) = if progress.complete {
            info!(register, partition = index, "Partition already complete");
            (RegisterOutcome::Completed, OutputTotals::default())
        } else {
            let task = HarvestTask {
                worker_id: index,
                identifiers: Arc::new(checkpoint.identifiers),
                range: progress.remaining(),
                start_seq: progress.next_shard_seq,
            };
            let layout = OutputLayout::new(dir, &class.name, extension);
            let mut output = PartitionOutput::open(&layout, store, progress)?;
            let mut conn = self.pool.acquire()?;
            let ctx = self.worker_context(register, class);
            let outcome = match harvest_partition(&ctx, &task, &mut *conn, &mut output, &self.stats)? {
                PartitionOutcome::Completed { .. } => RegisterOutcome::Completed,
                PartitionOutcome::Interrupted { .. } => RegisterOutcome::Interrupted,
            };
            (outcome, output.totals())
        };

        Ok(RegisterReport {
            register: register.to_string(),
            outcome,
            index_len,
            totals,
            duration: started.elapsed(),
        })
    }

    fn harvest_register(&self, register: &str) -> Result<(RegisterOutcome, usize, OutputTotals), HarvestError> {
        let (descriptor, class) = self.service.lookup(register)?;
        let extension = self.preflight(register)?;
        let checkpoint = self.load_index(descriptor, class, self.config.rebuild_index)?;
        let index_len = checkpoint.len();
        let stamp = checkpoint.stamp();

        if self.shutdown.load(Ordering::Relaxed) {
            return Ok((RegisterOutcome::Interrupted, index_len, OutputTotals::default()));
        }

        let parts = partition(index_len, self.config.worker_count);
        let (outcome, totals) = match self.config.model {
            ExecutionModel::Threads => self.run_threads(register, class, extension, checkpoint, &parts)?,
            ExecutionModel::Processes => self.run_processes(register, class, stamp, &parts)?,
        };
        Ok((outcome, index_len, totals))
    }

    /// Resolve the harvest view and format once, before touching data
    fn preflight(&self, register: &str) -> Result<&'static str, HarvestError> {
        let request = self.harvest_request();
        let negotiated = self.service.preflight(register, &request)?;
        let extension = negotiated
            .format
            .mimetype()
            .and_then(extension_for)
            .ok_or_else(|| ConfigError::InvalidFormat(self.config.format.clone()))?;

        info!(
            register,
            view = %negotiated.view,
            format = negotiated.format.mimetype().unwrap_or_default(),
            "Negotiated harvest representation"
        );
        Ok(extension)
    }

    fn harvest_request(&self) -> NegotiationRequest<'_> {
        NegotiationRequest::in_process(self.config.view.as_deref(), Some(&self.config.format))
    }

    fn load_index(
        &self,
        descriptor: &RegisterDescriptor,
        class: &EntityClass,
        force: bool,
    ) -> Result<CheckpointIndex, HarvestError> {
        let store = CheckpointStore::new(&self.config.output_dir).with_max_age(self.config.index_max_age);
        store.load_or_build(descriptor, force, || -> Result<Vec<Identifier>, HarvestError> {
            let retry = self.pool.retry_policy();
            let mut conn = self.pool.acquire()?;
            let count = retry.run(|| conn.count(class))?;
            let descriptor = descriptor.clone().with_total_count(count);
            let per_page = self.config.per_page.unwrap_or(descriptor.page_size);

            info!(register = %descriptor.name, count, per_page, "Enumerating register");
            let mut pages = ServicePages::new(&self.service, &mut *conn, retry);
            Ok(enumerate_register(&mut pages, &descriptor, per_page)?)
        })
    }

    fn worker_context(&self, register: &str, class: &EntityClass) -> WorkerContext {
        WorkerContext {
            service: self.service.clone(),
            register: register.to_string(),
            view: self.config.view.clone(),
            format: self.config.format.clone(),
            shard_threshold: class.shard_threshold,
            retry: self.pool.retry_policy(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    fn run_threads(
        &self,
        register: &str,
        class: &EntityClass,
        extension: &str,
        checkpoint: CheckpointIndex,
        parts: &[WorkPartition],
    ) -> Result<(RegisterOutcome, OutputTotals), HarvestError> {
        let dir = &self.config.output_dir;
        let layout = OutputLayout::new(dir, &class.name, extension);
        let store = ProgressStore::new(dir);
        let stamp = checkpoint.stamp();
        let identifiers = Arc::new(checkpoint.identifiers);

        let mut outputs = Vec::with_capacity(parts.len());
        let mut tasks = Vec::with_capacity(parts.len());
        for part in parts {
            let progress = store.resume_point(&class.name, register, part, parts.len(), stamp, self.config.restart);
            if progress.complete {
                info!(register, worker = part.worker_id, "Partition already complete");
                continue;
            }
            tasks.push(HarvestTask {
                worker_id: part.worker_id,
                identifiers: Arc::clone(&identifiers),
                range: progress.remaining(),
                start_seq: progress.next_shard_seq,
            });
            outputs.push(PartitionOutput::open(&layout, store.clone(), progress)?);
        }

        if tasks.is_empty() {
            info!(register, "Every partition already complete");
            return Ok((RegisterOutcome::Completed, OutputTotals::default()));
        }

        let queue = OutputQueue::new(self.config.queue_size);
        let queue_stats = queue.stats();
        let capacity = queue.capacity();
        let (sender, receiver) = queue.split();
        let writer = OutputWriter::spawn(register, dir, outputs, receiver)?;

        let ctx = Arc::new(self.worker_context(register, class));
        let mut workers = Vec::with_capacity(tasks.len());
        let mut failures = Vec::new();
        for task in tasks {
            let sink = QueueSink::new(sender.clone());
            match HarvestWorker::spawn(Arc::clone(&ctx), task, Arc::clone(&self.pool), sink, Arc::clone(&self.stats)) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(register, error = %e, "Failed to spawn worker");
                    failures.push(e.to_string());
                }
            }
        }
        // Output thread ends once the last worker drops its sender
        drop(sender);

        let mut interrupted = false;
        for worker in workers {
            let id = worker.id();
            match worker.join() {
                Ok(PartitionOutcome::Completed { written }) => {
                    info!(register, worker = id, written, "Worker finished");
                }
                Ok(PartitionOutcome::Interrupted { .. }) => interrupted = true,
                Err(e) => {
                    error!(register, worker = id, error = %e, "Worker failed");
                    failures.push(e.to_string());
                }
            }
        }

        let totals = writer.join()?;
        info!(
            register,
            capacity,
            backpressure = queue_stats.backpressure_count(),
            messages = queue_stats.throughput(),
            "Output queue drained"
        );

        let outcome = if !failures.is_empty() {
            RegisterOutcome::Failed(failures.join("; "))
        } else if interrupted {
            RegisterOutcome::Interrupted
        } else {
            RegisterOutcome::Completed
        };
        Ok((outcome, totals))
    }

    fn run_processes(
        &self,
        register: &str,
        class: &EntityClass,
        stamp: IndexStamp,
        parts: &[WorkPartition],
    ) -> Result<(RegisterOutcome, OutputTotals), HarvestError> {
        let store = ProgressStore::new(&self.config.output_dir);
        let pending: Vec<usize> = parts
            .iter()
            .filter(|part| {
                !store
                    .resume_point(&class.name, register, part, parts.len(), stamp, self.config.restart)
                    .complete
            })
            .map(|part| part.worker_id)
            .collect();

        if !pending.is_empty() {
            let program = process::current_program()?;
            let failures = process::run_partitions(&program, &self.config, register, &pending);
            if !failures.is_empty() {
                let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
                return Ok((RegisterOutcome::Failed(reasons.join("; ")), OutputTotals::default()));
            }
        }

        Ok(summarize_markers(&store, &class.name, parts))
    }
}

/// Outcome and record counts from the progress markers children left behind
fn summarize_markers(store: &ProgressStore, entity: &str, parts: &[WorkPartition]) -> (RegisterOutcome, OutputTotals) {
    let mut totals = OutputTotals::default();
    let mut complete = true;
    for part in parts {
        match store.load(entity, part.worker_id) {
            Ok(Some(progress)) => {
                totals.records += progress.records_written;
                complete &= progress.complete;
            }
            _ => complete = false,
        }
    }

    let outcome = if complete {
        RegisterOutcome::Completed
    } else {
        RegisterOutcome::Interrupted
    };
    (outcome, totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::gazetteer;
    use crate::render::EntityRenderer;
    use crate::source::{MemoryFactory, MemoryStore, Record};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir, store: MemoryStore, register: Option<&str>) -> Orchestrator<MemoryFactory> {
        let catalog = Arc::new(gazetteer::catalog());
        let renderer = Arc::new(EntityRenderer::for_catalog(&catalog));
        let mut config = HarvestConfig::new(Path::new("unused.db"), dir.path());
        config.register = register.map(str::to_string);
        config.worker_count = 2;
        config.format = "application/n-triples".to_string();
        config.retry_count = 1;
        Orchestrator::new(config, Service::new(catalog, renderer), MemoryFactory::new(store))
    }

    fn localities(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store.insert(
                "locality",
                Record::new(format!("LOC{:03}", i)).with("locality_name", "SPRINGFIELD"),
            );
        }
        store
    }

    #[test]
    fn test_discover_all_and_selected() {
        let dir = TempDir::new().unwrap();
        let all = orchestrator(&dir, MemoryStore::new(), None).discover().unwrap();
        assert_eq!(all, vec!["address", "locality", "street_locality", "address_site"]);

        let one = orchestrator(&dir, MemoryStore::new(), Some("locality")).discover().unwrap();
        assert_eq!(one, vec!["locality"]);
    }

    #[test]
    fn test_unknown_register_is_error() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(&dir, MemoryStore::new(), Some("parcel")).discover().unwrap_err();
        assert!(matches!(err, HarvestError::Config(ConfigError::UnknownRegister { .. })));
    }

    #[test]
    fn test_harvest_register_threads() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, localities(9), Some("locality"));
        let report = orch.run().unwrap();

        assert!(!report.any_failed());
        let locality = &report.registers[0];
        assert_eq!(locality.outcome, RegisterOutcome::Completed);
        assert_eq!(locality.index_len, 9);
        assert_eq!(locality.totals.records, 9);

        // 4 + 5 records, both under the threshold
        let first = fs::read_to_string(dir.path().join("locality-0-1.nt")).unwrap();
        let second = fs::read_to_string(dir.path().join("locality-1-1.nt")).unwrap();
        assert!(first.contains("LOC000"));
        assert!(second.contains("LOC008"));
        assert_eq!(orch.stats().harvested.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn test_second_run_skips_complete_partitions() {
        let dir = TempDir::new().unwrap();
        let store = localities(6);
        orchestrator(&dir, store.clone(), Some("locality")).run().unwrap();

        let again = orchestrator(&dir, store, Some("locality")).run().unwrap();
        assert_eq!(again.registers[0].outcome, RegisterOutcome::Completed);
        assert_eq!(again.totals().records, 0);
    }

    #[test]
    fn test_unsupported_format_fails_register() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, localities(3), Some("locality"));
        orch.config.view = Some("schemaorg".to_string());
        // schemaorg offers JSON-LD and Turtle only
        let report = orch.run().unwrap();
        assert!(report.any_failed());
        assert!(matches!(report.registers[0].outcome, RegisterOutcome::Failed(_)));
    }

    #[test]
    fn test_run_partition_writes_directly() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, localities(5), Some("locality"));
        let report = orch.run_partition("locality", 1).unwrap();

        assert_eq!(report.outcome, RegisterOutcome::Completed);
        assert_eq!(report.totals.records, 3);
        let marker = ProgressStore::new(dir.path()).load("locality", 1).unwrap().unwrap();
        assert!(marker.complete);
        assert_eq!(marker.next_offset, 5);
        assert!(ProgressStore::new(dir.path()).load("locality", 0).unwrap().is_none());
    }

    #[test]
    fn test_rebuilt_index_ignores_old_markers() {
        let dir = TempDir::new().unwrap();
        let store = localities(6);
        orchestrator(&dir, store.clone(), Some("locality")).run().unwrap();

        // Same count, different identifiers
        store.remove("locality", "LOC000");
        store.insert("locality", Record::new("LOC999").with("locality_name", "SHELBYVILLE"));

        let mut orch = orchestrator(&dir, store, Some("locality"));
        orch.config.rebuild_index = true;
        let report = orch.run().unwrap();
        assert_eq!(report.registers[0].outcome, RegisterOutcome::Completed);
        assert_eq!(report.totals().records, 6);

        let first = fs::read_to_string(dir.path().join("locality-0-1.nt")).unwrap();
        let second = fs::read_to_string(dir.path().join("locality-1-1.nt")).unwrap();
        assert!(!first.contains("LOC000"));
        assert!(second.contains("LOC999"));
    }

    #[test]
    fn test_summarize_markers() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path());
        let parts = partition(9, 3);
        let stamp = IndexStamp {
            count: 9,
            created_at: chrono::Utc::now(),
        };

        let mut done = crate::harvest::resume::PartitionProgress::fresh("locality", &parts[0], 3, stamp);
        done.next_offset = 3;
        done.records_written = 3;
        done.complete = true;
        store.save("locality", &done).unwrap();

        let mut partial = crate::harvest::resume::PartitionProgress::fresh("locality", &parts[1], 3, stamp);
        partial.next_offset = 4;
        partial.records_written = 1;
        store.save("locality", &partial).unwrap();

        // Partition 2 left no marker
        let (outcome, totals) = summarize_markers(&store, "locality", &parts);
        assert_eq!(outcome, RegisterOutcome::Interrupted);
        assert_eq!(totals.records, 4);

        let (outcome, totals) = summarize_markers(&store, "locality", &parts[..1]);
        assert_eq!(outcome, RegisterOutcome::Completed);
        assert_eq!(totals.records, 3);
    }

    #[test]
    fn test_process_model_skips_complete_partitions() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, localities(5), Some("locality"));
        orch.config.model = ExecutionModel::Processes;

        // What the child processes would have left behind
        orch.run_partition("locality", 0).unwrap();
        orch.run_partition("locality", 1).unwrap();

        let report = orch.run().unwrap();
        let locality = &report.registers[0];
        assert_eq!(locality.outcome, RegisterOutcome::Completed);
        assert_eq!(locality.index_len, 5);
        assert_eq!(locality.totals.records, 5);
    }
}
