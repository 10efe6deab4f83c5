//! gazetteer-harvester - Linked Data Gazetteer Publisher and Harvester
//!
//! Publishes a national address gazetteer as Linked Data through content
//! negotiation, and harvests every register of it into sharded RDF files
//! through that same negotiation path.
//!
//! # Features
//!
//! - **Content Negotiation**: `_view`, `_format` and `Accept` resolve to a
//!   (view, format) pair from the views each entity class declares.
//!
//! - **One Rendering Path**: Live requests and the harvester call the same
//!   service functions, so harvested output matches what clients receive.
//!
//! - **Checkpointed Enumeration**: Register identifiers are persisted once
//!   and reused; interrupted partitions resume from progress markers.
//!
//! - **Parallel Harvest**: Worker threads (or child processes) each take a
//!   contiguous partition of the index, with a bounded output queue and
//!   rotating shard files.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   SQLite gazetteer tables                        │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ ConnectionPool (bounded, retrying)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Service: catalog lookup ─► negotiate ─► render ─► serialize     │
//! └──────────────┬──────────────────────────────────┬───────────────┘
//!                │ listing pages                    │ one entity
//!                ▼                                  │
//! ┌──────────────────────────┐                      │
//! │ RegisterWalker           │                      │
//! │ ─► CheckpointIndex       │                      │
//! │ ─► partition(len, k)     │                      │
//! └─────────────┬────────────┘                      │
//!               ▼                                   │
//! │  ┌─────────┐  ┌─────────┐         ┌─────────┐   │
//! │  │Worker 0 │  │Worker 1 │  ...    │Worker N │ ◄─┘
//! │  └────┬────┘  └────┬────┘         └────┬────┘
//! │       └────────────┼───────────────────┘
//! │                    ▼
//! │        ┌──────────────────────────┐
//! │        │     Output Queue         │
//! │        │  (crossbeam bounded)     │
//! │        └────────────┬─────────────┘
//! │                     ▼
//! │        ┌──────────────────────────┐
//! │        │  Shard writers + logs    │
//! │        │  + progress markers      │
//! │        └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Harvest every register as Turtle
//! gazetteer-harvester --database gnaf.db -o harvest/
//!
//! # One register, N-Triples, 16 workers
//! gazetteer-harvester address --database gnaf.db -w 16 --format application/n-triples
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod harvest;
pub mod negotiate;
pub mod progress;
pub mod render;
pub mod service;
pub mod source;

pub use config::{CliArgs, ExecutionModel, HarvestConfig};
pub use error::{HarvestError, Result};
pub use harvest::{HarvestReport, Orchestrator};
pub use service::{HttpResponse, QueryParams, Service};
