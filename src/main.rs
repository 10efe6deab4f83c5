//! gazetteer-harvester - Linked Data gazetteer harvester
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use gazetteer_harvester::catalog::{gazetteer, RegisterCatalog};
use gazetteer_harvester::config::{CliArgs, HarvestConfig};
use gazetteer_harvester::harvest::{Orchestrator, RegisterOutcome, WorkerStats};
use gazetteer_harvester::progress::{print_header, print_summary, HarvestProgress, ProgressReporter};
use gazetteer_harvester::render::EntityRenderer;
use gazetteer_harvester::service::Service;
use gazetteer_harvester::source::SqliteFactory;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = HarvestConfig::from_args(args).context("Invalid configuration")?;

    let catalog = load_catalog(&config)?;
    let renderer = EntityRenderer::for_catalog(&catalog);
    let service = Service::new(Arc::new(catalog), Arc::new(renderer));
    let orchestrator = Orchestrator::new(config.clone(), service, SqliteFactory::new(&config.database));

    // Setup signal handler for graceful shutdown
    let shutdown_flag = orchestrator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    // Child process of the process model: one partition, no display
    if let (Some(register), Some(index)) = (config.register.as_deref(), config.partition) {
        let report = orchestrator
            .run_partition(register, index)
            .with_context(|| format!("Partition {} of '{}' failed", index, register))?;
        info!(
            register,
            partition = index,
            records = report.totals.records,
            outcome = ?report.outcome,
            "Partition finished"
        );
        return Ok(());
    }

    // Print header
    if config.show_progress {
        print_header(
            &config.database.display().to_string(),
            config.worker_count,
            &config.format,
            &config.output_dir.display().to_string(),
        );
    }

    // Create progress reporter
    let progress = if config.show_progress {
        Some(Arc::new(ProgressReporter::new()))
    } else {
        None
    };

    if let Some(ref p) = progress {
        p.set_status("Enumerating registers...");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = match progress {
        Some(ref p) => Some(spawn_ticker(Arc::clone(p), orchestrator.stats(), Arc::clone(&stop))?),
        None => None,
    };

    // Run the harvest
    let result = orchestrator.run();

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = ticker {
        let _ = handle.join();
    }

    let report = result.context("Harvest failed")?;

    // Finish progress
    if let Some(ref p) = progress {
        if report.any_failed() {
            p.finish("Harvest finished with failures");
        } else if report.interrupted() {
            p.finish("Harvest interrupted");
        } else {
            p.finish("Harvest completed");
        }
    }

    // Print summary
    if config.show_progress {
        print_summary(&report, &config.output_dir.display().to_string());
    }

    if report.interrupted() {
        info!("Harvest was interrupted; rerun to resume from progress markers");
    }

    let failed: Vec<&str> = report
        .registers
        .iter()
        .filter(|r| matches!(r.outcome, RegisterOutcome::Failed(_)))
        .map(|r| r.register.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("{} register(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

fn load_catalog(config: &HarvestConfig) -> Result<RegisterCatalog> {
    let catalog = match config.catalog_path {
        Some(ref path) => RegisterCatalog::from_json_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => gazetteer::catalog(),
    };
    catalog.validate().context("Invalid catalog")?;
    Ok(catalog)
}

fn spawn_ticker(
    progress: Arc<ProgressReporter>,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let started = Instant::now();
    thread::Builder::new()
        .name("progress".into())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if stats.processed() > 0 {
                    progress.update(&HarvestProgress::from_stats(&stats, started.elapsed()));
                }
                thread::sleep(Duration::from_millis(250));
            }
        })
        .context("Failed to spawn progress thread")
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("gazetteer_harvester=debug,warn")
    } else {
        EnvFilter::new("gazetteer_harvester=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
