//! # glimpse
//!
//! Fixed-step, multi-resolution round-robin time-series store for system
//! statistics.
//!
//! glimpse is the storage core of a lightweight system monitor: every
//! observed entity (a network interface, a disk, a UPS) gets its own
//! fixed-size artifact holding multi-decade history in bounded space.
//! Samples arrive at a fixed primary step, counters are turned into rates,
//! and consolidation cascades each finalized step into a ladder of coarser
//! archives at write time — rrdtool's storage philosophy as an embeddable
//! library.
//!
//! ## Key Properties
//!
//! - Bounded, predictable storage — artifact size is fixed by the schema,
//!   not by data volume
//! - Two input semantics: free-running counters (stored as rates, with
//!   wraparound recovery) and instantaneous gauges
//! - Explicit unknown markers for missing or stale data, never extrapolation
//! - Write-time consolidation (AVERAGE) into coarser archives
//! - No background threads; all state persists in memory-mapped artifacts,
//!   so a collector that runs once per cycle and exits resumes seamlessly
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use glimpse::{ArchiveSpec, DataSourceSpec, Registry, SeriesSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let step = Duration::from_secs(300);
//! let spec = SeriesSpec::new(
//!     step,
//!     vec![
//!         DataSourceSpec::counter("rx_bytes", step * 2),
//!         DataSourceSpec::counter("tx_bytes", step * 2),
//!     ],
//!     vec![
//!         // one day of per-step averages
//!         ArchiveSpec::new(step, Duration::from_secs(86_400)),
//!         // a year of half-day averages
//!         ArchiveSpec::new(Duration::from_secs(43_200), Duration::from_secs(31_536_000)),
//!     ],
//! )?;
//!
//! let mut registry = Registry::open("./data/counters", spec)?;
//! let series = registry.get_or_create("eth0")?;
//! series.record_batch(&[("rx_bytes", 1_234_567.0), ("tx_bytes", 89_012.0)], 1_700_000_000)?;
//!
//! for (timestamp, value) in series.query("rx_bytes", 1_699_990_000, None)? {
//!     println!("{timestamp}: {value:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`registry`] — entity id → series mapping, sanitization, collisions
//! - [`series`] — ingestion, step alignment, consolidation cascade
//! - [`archive`] — fixed-size ring semantics per resolution tier
//! - [`query`] — archive selection and windowed reads
//! - [`schema`] — series schema types and validation
//! - [`storage`] — directory layout and artifact provisioning
//! - [`slab`] — the memory-mapped artifact format
//! - [`error`] — error types

pub mod archive;
pub mod error;
mod ingest;
pub mod query;
pub mod registry;
pub mod schema;
pub mod series;
pub mod slab;
pub mod storage;

// Re-export primary API types at crate root for convenience.
pub use error::{GlimpseError, Result};
pub use query::QueryResult;
pub use registry::Registry;
pub use schema::{ArchiveSpec, DataSourceSpec, SeriesSpec, SourceKind};
pub use series::{JITTER_HOLD_STEPS, Series};
