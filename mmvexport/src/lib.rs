//! # mmvexport
//!
//! Export live in-process metrics through a memory-mapped file.
//!
//! mmvexport writes counters, gauges and constants into a fixed binary file
//! that an out-of-process monitoring agent maps and reads. The file is laid
//! out once, at start, and afterwards every update is a single in-place
//! store into a pre-assigned slot. The only synchronization with the reader
//! is the file itself: a generation stamp written first and last.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Deterministic, alignment-respecting layout computed before any write
//! - Two wire formats: a self-describing MMV file, or a packed legacy file
//!   with a text sidecar
//! - Unit classification into the agent's packed dimension word
//! - Non-blocking change notification with a single writer thread
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mmvexport::{BridgeConfig, FormatVariant, MmvWriter, MonitoredCounter, UpdateBridge};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let requests = Arc::new(MonitoredCounter::new("app.requests"));
//!
//! let mut writer = MmvWriter::new("/tmp/app.mmv", FormatVariant::Mmv.format());
//! writer.add_monitorable(requests.as_ref(), requests.unit().clone(), requests.semantics())?;
//! writer.start()?;
//! let writer = Arc::new(writer);
//!
//! let mut bridge = UpdateBridge::new(BridgeConfig::default())?;
//! bridge.start(Arc::clone(&writer))?;
//! let notifier = bridge.notifier();
//!
//! // On the hot path: bump the value, then signal. Never blocks.
//! requests.inc();
//! notifier.notify(requests.clone());
//!
//! bridge.stop()?;
//! writer.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`MmvWriter`] — Owns the metric set and the mapping; lifecycle and updates
//! - [`FileFormat`] — Layout and encoding strategy per wire format
//! - [`TypeHandler`] — Value kind → wire type, width and bytes
//! - [`UnitMappingTable`] — Unit → dimension word classifier
//! - [`UpdateBridge`] — Bounded change queue drained by one writer thread
//!
//! ## Modules
//!
//! - [`value`] — Runtime values, kinds and semantics
//! - [`handler`] — Type handler dispatch
//! - [`unit`] — Physical units and scales
//! - [`dimension`] — Unit classification and the dimension word
//! - [`layout`] — Layout planning primitives
//! - [`format`] — Wire format variants
//! - [`region`] — The memory-mapped backing file
//! - [`writer`] — Writer lifecycle and updates
//! - [`bridge`] — Change notification and the writer thread
//! - [`monitored`] — Ready-made monitorable values
//! - [`config`] — JSON configuration
//! - [`error`] — Error types

pub mod bridge;
pub mod config;
pub mod dimension;
pub mod error;
pub mod format;
pub mod handler;
pub mod layout;
pub mod metric;
pub mod monitored;
pub mod region;
pub mod unit;
pub mod value;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use bridge::{Monitorable, UpdateBridge, UpdateNotifier};
pub use config::{BridgeConfig, MetricConfig, WriterConfig};
pub use dimension::{DimensionSet, UnitMapping, UnitMappingTable};
pub use error::{MmvError, Result};
pub use format::{FileFormat, FormatVariant};
pub use handler::{TypeHandler, TypeHandlerRegistry};
pub use layout::{FileLayout, MetricOffsets};
pub use metric::Metric;
pub use monitored::{MonitoredConstant, MonitoredCounter, MonitoredGauge};
pub use unit::Unit;
pub use value::{MetricValue, Semantics, ValueKind};
pub use writer::MmvWriter;
