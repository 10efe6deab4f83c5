//! Error types for gazetteer-harvester
//!
//! This module defines the error hierarchy for both request paths:
//! - Content negotiation failures (shared by live requests and the harvester)
//! - Record source, connection pool and rendering errors
//! - Register walking, checkpoint and shard output errors
//! - Configuration and worker errors
//!
//! Library code uses thiserror enums; the binary wraps them with anyhow
//! context.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a harvest run
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Catalog definition errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Negotiation failed for the configured harvest view/format
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Service-level errors (discovery, listing)
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Register enumeration errors
    #[error("Register walk error: {0}")]
    Walk(#[from] WalkError),

    /// Checkpoint index errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Shard and log output errors
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Record source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// I/O errors (file operations, process spawning)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content negotiation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The requested (or default) view is not defined for the class
    #[error("Unknown view '{view}' (available: {available})")]
    UnknownView { view: String, available: String },

    /// An explicitly requested format is not offered by the view
    #[error("Format '{format}' is not supported by view '{view}' (supported: {supported})")]
    UnsupportedFormat {
        view: String,
        format: String,
        supported: String,
    },
}

/// Record source and connection pool errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to open a connection
    #[error("Failed to connect to record source: {reason}")]
    Connect { reason: String },

    /// Every pooled connection stayed checked out through all retries
    #[error("Connection pool exhausted after {attempts} attempts ({max} connections)")]
    PoolExhausted { attempts: u32, max: usize },

    /// The store is temporarily unavailable (locked, busy)
    #[error("Record source busy: {0}")]
    Busy(String),

    /// A query failed for a non-transient reason
    #[error("Query on '{table}' failed: {reason}")]
    Query { table: String, reason: String },

    /// A table or column name failed validation
    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SourceError {
    /// Check if this error is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Connect { .. } | SourceError::Busy(_) => true,
            SourceError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Check if this error means the retry budget was already spent
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SourceError::PoolExhausted { .. })
    }
}

/// Errors raised while building or serializing a representation
#[derive(Error, Debug)]
pub enum RenderError {
    /// No builder is registered for a view token
    #[error("No representation builder registered for view '{view}'")]
    MissingBuilder { view: String },

    /// No serializer exists for a format
    #[error("No serializer for format '{format}'")]
    UnsupportedFormat { format: String },

    /// The builder failed for a particular record
    #[error("Failed to build view '{view}' for '{id}': {reason}")]
    Build {
        view: String,
        id: String,
        reason: String,
    },

    /// An IRI that cannot be written in Turtle or N-Triples
    #[error("IRI cannot be serialized: <{iri}>")]
    InvalidIri { iri: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the shared negotiation-plus-render path
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Negotiation failed
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// No register with this name
    #[error("Register not found: {0}")]
    UnknownRegister(String),

    /// Register points at a class the catalog does not define
    #[error("Entity class not found: {0}")]
    UnknownClass(String),

    /// The identifier no longer resolves to a record
    #[error("No '{class}' record with identifier '{id}'")]
    NotFound { class: String, id: String },

    /// Invalid paging parameters
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Representation construction failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Record source failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl ServiceError {
    /// Machine-readable error type used in HTTP error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            ServiceError::Negotiation(NegotiationError::UnknownView { .. }) => "unknown_view",
            ServiceError::Negotiation(NegotiationError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::UnknownRegister(_) => "unknown_register",
            ServiceError::UnknownClass(_) => "unknown_class",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::InvalidParameter { .. } => "invalid_parameter",
            ServiceError::Render(_) => "render_error",
            ServiceError::Source(e) if e.is_transient() || e.is_exhausted() => "unavailable",
            ServiceError::Source(_) => "source_error",
        }
    }

    /// HTTP status code for the live serving path
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Negotiation(NegotiationError::UnknownView { .. }) => 400,
            ServiceError::Negotiation(NegotiationError::UnsupportedFormat { .. }) => 406,
            ServiceError::InvalidParameter { .. } => 400,
            ServiceError::UnknownRegister(_) | ServiceError::NotFound { .. } => 404,
            ServiceError::Source(e) if e.is_transient() || e.is_exhausted() => 503,
            ServiceError::UnknownClass(_) | ServiceError::Render(_) | ServiceError::Source(_) => {
                500
            }
        }
    }

    /// Error body returned to HTTP clients instead of a stack trace
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_type: self.error_type().to_string(),
            code: self.status_code(),
            message: self.to_string(),
        }
    }

    /// Check if a retry could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Source(e) if e.is_transient())
    }
}

/// JSON body of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub code: u16,
    pub message: String,
}

/// Register enumeration errors
#[derive(Error, Debug)]
pub enum WalkError {
    /// A listing page failed
    #[error("Listing page {page} of register '{register}' failed: {source}")]
    Page {
        register: String,
        page: u64,
        #[source]
        source: ServiceError,
    },

    /// An empty page arrived before the advertised end of the register
    #[error(
        "Register '{register}' ended early at page {page}: saw {seen} of {expected} identifiers"
    )]
    PrematureEnd {
        register: String,
        page: u64,
        seen: u64,
        expected: u64,
    },

    /// A listing page returned a non-listing representation
    #[error("Listing page {page} of register '{register}' returned an unexpected representation")]
    UnexpectedRepresentation { register: String, page: u64 },
}

/// Checkpoint index and progress marker errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// File operation failed
    #[error("Checkpoint I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File exists but cannot be trusted
    #[error("Checkpoint '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization error
    #[error("Checkpoint serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shard, log and output-thread errors
#[derive(Error, Debug)]
pub enum OutputError {
    /// File operation failed
    #[error("Output I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record asked for a shard that was already rotated past
    #[error("Shard {requested} of worker {worker} requested after rotating to {current}")]
    ShardRegressed {
        worker: usize,
        requested: u32,
        current: u32,
    },

    /// A record arrived for a worker the output thread does not know
    #[error("No output registered for worker {0}")]
    UnknownWorker(usize),

    /// Progress marker could not be persisted
    #[error("Progress marker error: {0}")]
    Progress(#[from] CheckpointError),

    /// The output queue closed while workers were still sending
    #[error("Output channel closed unexpectedly")]
    ChannelClosed,

    /// Output thread panicked
    #[error("Output thread panicked")]
    Panicked,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid page size
    #[error("Invalid page size {size}: must be between {min} and {max}")]
    InvalidPageSize { size: usize, min: usize, max: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// Invalid connection count
    #[error("Invalid connection count {count}: must be at least {min}")]
    InvalidConnectionCount { count: usize, min: usize },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Database path error
    #[error("Invalid database '{path}': {reason}")]
    InvalidDatabase { path: PathBuf, reason: String },

    /// Catalog file error
    #[error("Cannot load catalog '{path}': {reason}")]
    InvalidCatalog { path: PathBuf, reason: String },

    /// Harvest format has no shard file extension
    #[error("Format '{0}' cannot be harvested (no serializer)")]
    InvalidFormat(String),

    /// Selected register is not in the catalog
    #[error("Unknown register '{name}' (known: {known})")]
    UnknownRegister { name: String, known: String },
}

/// Catalog definition errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Two classes share a URI or name
    #[error("Duplicate entity class '{0}'")]
    DuplicateClass(String),

    /// Two registers share a name
    #[error("Duplicate register '{0}'")]
    DuplicateRegister(String),

    /// A register references an undefined class
    #[error("Register '{register}' references unknown class '{class}'")]
    UnknownClass { register: String, class: String },

    /// The default view is not among the class's views
    #[error("Class '{class}' default view '{view}' is not defined")]
    MissingDefaultView { class: String, view: String },

    /// A view's default format is not among its supported formats
    #[error("View '{view}' of '{class}' has default format '{format}' outside its supported formats")]
    InvalidDefaultFormat {
        class: String,
        view: String,
        format: String,
    },

    /// A view declares a token reserved for the service
    #[error("Class '{class}' redefines reserved view '{view}'")]
    ReservedView { class: String, view: String },

    /// A table or column name is not a plain SQL identifier
    #[error("Class '{class}' has invalid SQL identifier '{name}'")]
    InvalidIdentifier { class: String, name: String },

    /// Shard threshold must be positive
    #[error("Class '{0}' has a zero shard threshold")]
    ZeroThreshold(String),
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker could not start (thread spawn, connection)
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },

    /// Negotiation failed mid-run: configuration bug
    #[error("Worker {id} negotiation error: {source}")]
    Negotiation {
        id: usize,
        #[source]
        source: NegotiationError,
    },

    /// Transient source errors outlasted every retry
    #[error("Worker {id} gave up on the record source: {source}")]
    SourceExhausted {
        id: usize,
        #[source]
        source: SourceError,
    },

    /// Output sink failed
    #[error("Worker {id} output error: {source}")]
    Output {
        id: usize,
        #[source]
        source: OutputError,
    },

    /// Child process exited with failure (process-parallel model)
    #[error("Worker process {id} exited with {status}")]
    ProcessFailed { id: usize, status: String },
}

/// Result type alias for HarvestError
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for ServiceError
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Result type alias for OutputError
pub type OutputResult<T> = std::result::Result<T, OutputError>;
