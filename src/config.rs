//! Configuration types for gazetteer-harvester
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Arguments forwarded to partition child processes

use crate::error::ConfigError;
use crate::negotiate::normalize_mime;
use crate::render::extension_for;
use crate::service::MAX_PER_PAGE;
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Minimum queue size
const MIN_QUEUE_SIZE: usize = 16;

/// Page size limits for register walks
const MIN_PAGE_SIZE: usize = 1;

/// Harvest format used when none is given
pub const DEFAULT_FORMAT: &str = "text/turtle";

/// Register names and view tokens as they appear on the command line
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$").expect("Invalid token regex"));

/// Harvest a Linked Data address gazetteer into sharded RDF files
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gazetteer-harvester",
    version,
    about = "Harvest a Linked Data address gazetteer into sharded RDF files",
    long_about = "Enumerates every register of the gazetteer through the same content-negotiated \
                  path that serves live requests, persists the identifier list as a checkpoint \
                  index, and renders each entity into rotating shard files.\n\n\
                  Interrupted harvests resume from per-partition progress markers.",
    after_help = "EXAMPLES:\n    \
        gazetteer-harvester --database gnaf.db -o out/\n    \
        gazetteer-harvester address --database gnaf.db -w 16 --format application/n-triples\n    \
        gazetteer-harvester locality --database gnaf.db --view schemaorg --format application/ld+json\n    \
        gazetteer-harvester address --database gnaf.db --model processes --rebuild-index"
)]
pub struct CliArgs {
    /// Register to harvest (all registers if omitted)
    #[arg(value_name = "REGISTER")]
    pub register: Option<String>,

    /// SQLite database holding the gazetteer tables
    #[arg(long, env = "GAZETTEER_DATABASE", value_name = "FILE")]
    pub database: PathBuf,

    /// Output directory for indexes, shards, logs and progress markers
    #[arg(short, long, default_value = "harvest", value_name = "DIR")]
    pub output: PathBuf,

    /// Number of workers per register
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Page size for register enumeration (register default if not set)
    #[arg(long, value_name = "NUM")]
    pub per_page: Option<usize>,

    /// Output queue size per register (controls memory usage)
    #[arg(long, default_value = "1024", value_name = "NUM")]
    pub queue_size: usize,

    /// View to harvest (class default if not set)
    #[arg(long, value_name = "TOKEN")]
    pub view: Option<String>,

    /// Format to harvest
    #[arg(long, default_value = DEFAULT_FORMAT, value_name = "MIME")]
    pub format: String,

    /// Execution model for partitions
    #[arg(long, value_enum, default_value_t = ExecutionModel::Threads)]
    pub model: ExecutionModel,

    /// Rebuild checkpoint indexes even if present
    #[arg(long)]
    pub rebuild_index: bool,

    /// Rebuild checkpoint indexes older than this many hours
    #[arg(long, value_name = "HOURS")]
    pub index_max_age_hours: Option<u64>,

    /// Ignore progress markers and harvest every partition from the start
    #[arg(long)]
    pub restart: bool,

    /// Number of retry attempts for transient source errors
    #[arg(long, default_value = "5", value_name = "NUM")]
    pub retries: u32,

    /// Connection pool size (workers x registers + registers if not set)
    #[arg(long, value_name = "NUM")]
    pub max_connections: Option<usize>,

    /// JSON catalog file replacing the built-in gazetteer catalog
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Harvest one partition only (used by the process model)
    #[arg(long, value_name = "INDEX", hide = true)]
    pub partition: Option<usize>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// How partitions are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionModel {
    /// One thread per partition, one output thread per register
    Threads,
    /// One child process per partition writing its own files
    Processes,
}

fn default_workers() -> usize {
    // Rendering is CPU bound, SQLite reads are cheap
    num_cpus::get()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Selected register (all if `None`)
    pub register: Option<String>,

    /// SQLite record source
    pub database: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Workers per register
    pub worker_count: usize,

    /// Enumeration page size override
    pub per_page: Option<usize>,

    /// Output queue capacity per register
    pub queue_size: usize,

    /// Harvest view override
    pub view: Option<String>,

    /// Harvest format (normalized mimetype)
    pub format: String,

    pub model: ExecutionModel,

    /// Always rebuild checkpoint indexes
    pub rebuild_index: bool,

    /// Maximum checkpoint index age
    pub index_max_age: Option<chrono::Duration>,

    /// Ignore progress markers
    pub restart: bool,

    /// Retry count for transient errors
    pub retry_count: u32,

    /// Connection pool size override
    pub max_connections: Option<usize>,

    /// External catalog file
    pub catalog_path: Option<PathBuf>,

    /// Single partition to harvest (child process mode)
    pub partition: Option<usize>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl HarvestConfig {
    /// Defaults for a harvest of every register
    pub fn new(database: &Path, output_dir: &Path) -> Self {
        Self {
            register: None,
            database: database.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            worker_count: default_workers(),
            per_page: None,
            queue_size: 1024,
            view: None,
            format: DEFAULT_FORMAT.to_string(),
            model: ExecutionModel::Threads,
            rebuild_index: false,
            index_max_age: None,
            restart: false,
            retry_count: 5,
            max_connections: None,
            catalog_path: None,
            partition: None,
            show_progress: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // Validate worker count
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        // Validate page size
        if let Some(size) = args.per_page {
            if !(MIN_PAGE_SIZE..=MAX_PER_PAGE).contains(&size) {
                return Err(ConfigError::InvalidPageSize {
                    size,
                    min: MIN_PAGE_SIZE,
                    max: MAX_PER_PAGE,
                });
            }
        }

        // Validate queue size
        if args.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: args.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        if let Some(count) = args.max_connections {
            if count == 0 {
                return Err(ConfigError::InvalidConnectionCount { count, min: 1 });
            }
        }

        // The harvest format must map to a shard extension
        let format = normalize_mime(&args.format);
        if extension_for(&format).is_none() {
            return Err(ConfigError::InvalidFormat(args.format));
        }

        if let Some(register) = &args.register {
            if !TOKEN_REGEX.is_match(register) {
                return Err(ConfigError::UnknownRegister {
                    name: register.clone(),
                    known: "names made of letters, digits, '_', '.', '-'".to_string(),
                });
            }
        }

        if args.partition.is_some() && args.register.is_none() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.output.clone(),
                reason: "--partition requires a register".to_string(),
            });
        }

        // Validate database
        if !args.database.is_file() {
            return Err(ConfigError::InvalidDatabase {
                path: args.database.clone(),
                reason: "Database file does not exist".to_string(),
            });
        }

        // Validate catalog
        if let Some(ref catalog) = args.catalog {
            if !catalog.is_file() {
                return Err(ConfigError::InvalidCatalog {
                    path: catalog.clone(),
                    reason: "Catalog file does not exist".to_string(),
                });
            }
        }

        // Validate output directory
        if args.output.exists() && !args.output.is_dir() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.output.clone(),
                reason: "Output path exists and is not a directory".to_string(),
            });
        }
        if let Some(parent) = args.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidOutputPath {
                    path: args.output.clone(),
                    reason: format!("Parent directory '{}' does not exist", parent.display()),
                });
            }
        }

        let index_max_age = args
            .index_max_age_hours
            .map(|hours| chrono::Duration::hours(hours.min(i64::MAX as u64 / 3600) as i64));

        Ok(Self {
            register: args.register,
            database: args.database,
            output_dir: args.output,
            worker_count: args.workers,
            per_page: args.per_page,
            queue_size: args.queue_size,
            view: args.view,
            format,
            model: args.model,
            rebuild_index: args.rebuild_index,
            index_max_age,
            restart: args.restart,
            retry_count: args.retries,
            max_connections: args.max_connections,
            catalog_path: args.catalog,
            partition: args.partition,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Connection pool size for `registers` registers harvested at once
    ///
    /// Every worker holds one connection; each register needs one more for
    /// enumeration.
    pub fn connection_budget(&self, registers: usize) -> usize {
        self.max_connections
            .unwrap_or_else(|| registers.max(1) * (self.worker_count + 1))
    }

    /// Arguments for the child process harvesting partition `index`
    pub fn child_args(&self, register: &str, index: usize) -> Vec<String> {
        let mut args = vec![
            register.to_string(),
            "--partition".to_string(),
            index.to_string(),
            "--database".to_string(),
            self.database.display().to_string(),
            "--output".to_string(),
            self.output_dir.display().to_string(),
            "--workers".to_string(),
            self.worker_count.to_string(),
            "--format".to_string(),
            self.format.clone(),
            "--retries".to_string(),
            self.retry_count.to_string(),
            "--max-connections".to_string(),
            "1".to_string(),
            "--quiet".to_string(),
        ];
        if let Some(per_page) = self.per_page {
            args.push("--per-page".to_string());
            args.push(per_page.to_string());
        }
        if let Some(ref view) = self.view {
            args.push("--view".to_string());
            args.push(view.clone());
        }
        if let Some(ref catalog) = self.catalog_path {
            args.push("--catalog".to_string());
            args.push(catalog.display().to_string());
        }
        if self.restart {
            args.push("--restart".to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(dir: &TempDir, extra: &[&str]) -> Result<HarvestConfig, ConfigError> {
        let db = dir.path().join("gnaf.db");
        std::fs::write(&db, b"").unwrap();
        let db = db.display().to_string();
        let out = dir.path().join("out").display().to_string();
        let mut argv = vec!["gazetteer-harvester", "--database", db.as_str(), "-o", out.as_str()];
        argv.extend_from_slice(extra);
        HarvestConfig::from_args(CliArgs::parse_from(argv))
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let config = parse(&dir, &[]).unwrap();
        assert_eq!(config.format, "text/turtle");
        assert_eq!(config.model, ExecutionModel::Threads);
        assert!(config.register.is_none());
        assert!(config.show_progress);
        assert!(config.index_max_age.is_none());
    }

    #[test]
    fn test_format_normalized_and_checked() {
        let dir = TempDir::new().unwrap();
        let config = parse(&dir, &["--format", "Application/N-Triples; charset=utf-8"]).unwrap();
        assert_eq!(config.format, "application/n-triples");

        assert!(matches!(
            parse(&dir, &["--format", "application/pdf"]),
            Err(ConfigError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse(&dir, &["--format", "_internal"]),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_limits() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            parse(&dir, &["-w", "0"]),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
        assert!(matches!(
            parse(&dir, &["--per-page", "0"]),
            Err(ConfigError::InvalidPageSize { .. })
        ));
        assert!(matches!(
            parse(&dir, &["--queue-size", "2"]),
            Err(ConfigError::InvalidQueueSize { .. })
        ));
        assert!(matches!(
            parse(&dir, &["--max-connections", "0"]),
            Err(ConfigError::InvalidConnectionCount { .. })
        ));
    }

    #[test]
    fn test_missing_database() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.db").display().to_string();
        let args = CliArgs::parse_from(["gazetteer-harvester", "--database", missing.as_str()]);
        assert!(matches!(
            HarvestConfig::from_args(args),
            Err(ConfigError::InvalidDatabase { .. })
        ));
    }

    #[test]
    fn test_connection_budget() {
        let dir = TempDir::new().unwrap();
        let config = parse(&dir, &["-w", "4"]).unwrap();
        assert_eq!(config.connection_budget(4), 20);
        assert_eq!(config.connection_budget(1), 5);

        let config = parse(&dir, &["-w", "4", "--max-connections", "3"]).unwrap();
        assert_eq!(config.connection_budget(4), 3);
    }

    #[test]
    fn test_child_args_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = parse(
            &dir,
            &["address", "-w", "3", "--view", "ISO19160", "--per-page", "500", "--restart"],
        )
        .unwrap();

        let mut argv = vec!["gazetteer-harvester".to_string()];
        argv.extend(config.child_args("address", 2));
        let child = HarvestConfig::from_args(CliArgs::parse_from(argv)).unwrap();

        assert_eq!(child.partition, Some(2));
        assert_eq!(child.register.as_deref(), Some("address"));
        assert_eq!(child.worker_count, 3);
        assert_eq!(child.view.as_deref(), Some("ISO19160"));
        assert_eq!(child.per_page, Some(500));
        assert_eq!(child.max_connections, Some(1));
        assert!(child.restart);
        assert!(!child.show_progress);
    }

    #[test]
    fn test_partition_requires_register() {
        let dir = TempDir::new().unwrap();
        assert!(parse(&dir, &["--partition", "1"]).is_err());
    }
}
