//! The mapped-file writer.
//!
//! [`MmvWriter`] owns the metric set, the chosen [`FileFormat`] and, once
//! started, the [`MappedRegion`] backing the file. Its lifecycle is strictly
//! ordered:
//!
//! ```text
//! new ─► register_handler / add_metric* ─► start ─► update_metric* ─► stop
//! ```
//!
//! Registration takes `&mut self`; once started, the writer is normally
//! wrapped in an `Arc` and shared with the [`UpdateBridge`](crate::bridge::UpdateBridge),
//! so updates and `stop` take `&self`. Ordering violations fail fast with a
//! [`LifecycleError`].
//!
//! # Example
//!
//! ```rust,no_run
//! use mmvexport::{FormatVariant, MetricValue, MmvWriter, Semantics, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = MmvWriter::new("/tmp/app.mmv", FormatVariant::Mmv.format());
//! writer.add_metric("app.requests", Unit::COUNT, Semantics::Counter, 0i64)?;
//! writer.add_metric("app.heap", Unit::BYTE, Semantics::Instant, 0u64)?;
//! writer.start()?;
//!
//! writer.update_metric("app.requests", &MetricValue::I64(17))?;
//! writer.stop()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use crate::bridge::Monitorable;
use crate::config::WriterConfig;
use crate::dimension::UnitMappingTable;
use crate::error::{ConfigurationError, LifecycleError, Result, UpdateError};
use crate::format::FileFormat;
use crate::handler::{TypeHandler, TypeHandlerRegistry};
use crate::layout::{FileLayout, MetricOffsets};
use crate::metric::Metric;
use crate::region::MappedRegion;
use crate::unit::Unit;
use crate::value::{MetricValue, Semantics, ValueKind};

/// Encoded values up to this width are staged on the stack.
const SCRATCH_SIZE: usize = 16;

const UNSTARTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Writes registered metrics into a memory-mapped file.
///
/// # Thread Safety
///
/// After `start()` the writer is `Sync`: `update_metric` may be called from
/// any thread. Two threads updating the *same* metric concurrently may leave
/// either value in the slot; the [`UpdateBridge`](crate::bridge::UpdateBridge)
/// avoids this by funnelling all updates through one thread.
#[derive(Debug)]
pub struct MmvWriter {
    /// Path of the data file.
    path: PathBuf,
    /// Wire format strategy.
    format: Box<dyn FileFormat>,
    /// Kind → handler table used by `add_metric`.
    handlers: TypeHandlerRegistry,
    /// Shared, read-only unit classification table.
    units: Arc<UnitMappingTable>,
    /// Metrics in registration order.
    metrics: Vec<Metric>,
    /// Name → index into `metrics`.
    index: HashMap<String, usize>,
    /// Planned layout, set by `start()`.
    layout: Option<FileLayout>,
    /// The live mapping; cleared by `stop()`.
    region: ArcSwapOption<MappedRegion>,
    /// Lifecycle phase.
    state: AtomicU8,
    /// Generation stamp written at `start()`.
    generation: u64,
    /// Sidecar path, if the format wrote one.
    sidecar: Option<PathBuf>,
}

impl MmvWriter {
    /// Creates an unstarted writer for `path` with the default handlers.
    pub fn new<P: AsRef<Path>>(path: P, format: Box<dyn FileFormat>) -> Self {
        Self::with_unit_table(path, format, Arc::new(UnitMappingTable::new()))
    }

    /// Creates a writer that shares an existing unit table.
    pub fn with_unit_table<P: AsRef<Path>>(
        path: P,
        format: Box<dyn FileFormat>,
        units: Arc<UnitMappingTable>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
            handlers: TypeHandlerRegistry::with_defaults(),
            units,
            metrics: Vec::new(),
            index: HashMap::new(),
            layout: None,
            region: ArcSwapOption::empty(),
            state: AtomicU8::new(UNSTARTED),
            generation: 0,
            sidecar: None,
        }
    }

    /// Creates an unstarted writer and registers every metric in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a metric is rejected.
    pub fn from_config(config: &WriterConfig) -> Result<Self> {
        config.validate()?;
        let mut writer = Self::new(&config.path, config.variant.format());
        for metric in &config.metrics {
            let unit: Unit = metric.unit.parse()?;
            writer.add_metric(&metric.name, unit, metric.semantics, metric.initial.clone())?;
        }
        Ok(writer)
    }

    /// Registers (or replaces) the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AddAfterStart`] once the writer is started.
    pub fn register_handler(&mut self, kind: ValueKind, handler: Arc<dyn TypeHandler>) -> Result<()> {
        self.ensure_unstarted()?;
        self.handlers.register(kind, handler);
        Ok(())
    }

    /// Registers a metric, resolving its handler from the initial value's kind.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AddAfterStart`] once the writer is started
    /// - [`ConfigurationError::NoHandler`] if no handler covers the kind
    /// - [`ConfigurationError::DuplicateMetric`], [`ConfigurationError::NameTooLong`]
    ///   or [`ConfigurationError::InvalidName`] for a bad name
    pub fn add_metric(
        &mut self,
        name: &str,
        unit: Unit,
        semantics: Semantics,
        initial: impl Into<MetricValue>,
    ) -> Result<()> {
        self.ensure_unstarted()?;
        let initial = initial.into();
        let handler = self.handlers.resolve(initial.kind())?;
        self.insert(name, unit, semantics, handler, initial)
    }

    /// Registers a metric with an explicit handler, bypassing lookup.
    ///
    /// # Errors
    ///
    /// As [`add_metric`](Self::add_metric), plus
    /// [`ConfigurationError::TypeMismatch`] if the handler does not encode
    /// the initial value's kind.
    pub fn add_metric_with_handler(
        &mut self,
        name: &str,
        unit: Unit,
        semantics: Semantics,
        handler: Arc<dyn TypeHandler>,
        initial: impl Into<MetricValue>,
    ) -> Result<()> {
        self.ensure_unstarted()?;
        let initial = initial.into();
        if handler.kind() != initial.kind() {
            return Err(ConfigurationError::TypeMismatch {
                expected: handler.kind(),
                actual: initial.kind(),
            }
            .into());
        }
        self.insert(name, unit, semantics, handler, initial)
    }

    /// Registers a monitorable under its own name, with its current value as
    /// the initial value.
    ///
    /// # Errors
    ///
    /// As [`add_metric`](Self::add_metric).
    pub fn add_monitorable(&mut self, metric: &dyn Monitorable, unit: Unit, semantics: Semantics) -> Result<()> {
        self.add_metric(metric.name(), unit, semantics, metric.current())
    }

    fn insert(
        &mut self,
        name: &str,
        unit: Unit,
        semantics: Semantics,
        handler: Arc<dyn TypeHandler>,
        initial: MetricValue,
    ) -> Result<()> {
        self.format.validate_name(name)?;
        if self.index.contains_key(name) {
            return Err(ConfigurationError::DuplicateMetric {
                name: name.to_string(),
            }
            .into());
        }

        let mapping = self.units.find_unit_mapping(&unit).clone();
        debug!(
            metric = name,
            unit = %unit,
            dimension = ?mapping.dimension_set(),
            kind = handler.type_name(),
            "registered metric"
        );

        self.index.insert(name.to_string(), self.metrics.len());
        self.metrics.push(Metric::new(
            name.to_string(),
            semantics,
            unit,
            mapping,
            handler,
            initial,
        ));
        Ok(())
    }

    /// Plans the layout, creates and maps the file, writes all structure and
    /// initial values, then publishes the generation stamp.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyStarted`] on a second call
    /// - [`LifecycleError::Stopped`] after `stop()`
    /// - [`MappingError`](crate::error::MappingError) on I/O failure; the
    ///   writer stays unstarted and nothing remains mapped
    pub fn start(&mut self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            STARTED => return Err(LifecycleError::AlreadyStarted.into()),
            STOPPED => return Err(LifecycleError::Stopped.into()),
            _ => {}
        }

        let layout = self.format.plan(&self.metrics)?;
        let generation = generation_stamp();
        debug!(
            path = %self.path.display(),
            variant = ?self.format.variant(),
            length = layout.length(),
            metrics = self.metrics.len(),
            "planned layout"
        );

        let mut region = MappedRegion::create(&self.path, layout.length())?;
        self.format
            .write_structure(region.as_mut_slice(), &layout, &self.metrics, generation)?;
        let sidecar = self
            .format
            .write_sidecar(&self.path, &layout, &self.metrics, generation)?;
        self.format.publish(region.as_mut_slice(), generation);
        region.flush()?;

        self.layout = Some(layout);
        self.generation = generation;
        self.sidecar = sidecar;
        self.region.store(Some(Arc::new(region)));
        self.state.store(STARTED, Ordering::Release);

        info!(
            path = %self.path.display(),
            generation,
            metrics = self.metrics.len(),
            "metrics file published"
        );
        Ok(())
    }

    /// Encodes `value` into the named metric's slot.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotStarted`] before `start()`
    /// - [`LifecycleError::Stopped`] after `stop()`
    /// - [`UpdateError::UnknownMetric`] for an unregistered name
    /// - [`ConfigurationError::TypeMismatch`] if the value's kind differs
    ///   from the metric's handler
    pub fn update_metric(&self, name: &str, value: &MetricValue) -> Result<()> {
        let guard = self.region.load();
        let Some(region) = guard.as_ref() else {
            return Err(self.inactive_error().into());
        };
        let Some(&index) = self.index.get(name) else {
            return Err(UpdateError::UnknownMetric {
                name: name.to_string(),
            }
            .into());
        };
        let Some(offsets) = self.layout.as_ref().and_then(|l| l.offset(index)) else {
            return Err(LifecycleError::NotStarted.into());
        };

        let handler = self.metrics[index].handler();
        let width = handler.data_length();
        let offset = offsets.value as usize;
        if width <= SCRATCH_SIZE {
            let mut scratch = [0u8; SCRATCH_SIZE];
            handler.put_bytes(&mut scratch[..width], value)?;
            region.store(offset, &scratch[..width])
        } else {
            let mut scratch = vec![0u8; width];
            handler.put_bytes(&mut scratch, value)?;
            region.store(offset, &scratch)
        }
    }

    /// Releases the mapping. Later updates fail with
    /// [`LifecycleError::Stopped`]. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] if the writer was never
    /// started, or a flush error from the final sync.
    pub fn stop(&self) -> Result<()> {
        match self
            .state
            .compare_exchange(STARTED, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(STOPPED) => return Ok(()),
            Err(_) => return Err(LifecycleError::NotStarted.into()),
        }

        let region = self.region.swap(None);
        info!(path = %self.path.display(), "metrics writer stopped");
        match region {
            Some(region) => region.flush(),
            None => Ok(()),
        }
    }

    /// Whether `start()` completed and `stop()` has not been called.
    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }

    /// The generation stamp, or 0 before `start()`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The planned layout, available after `start()`.
    pub fn layout(&self) -> Option<&FileLayout> {
        self.layout.as_ref()
    }

    /// Offsets of the named metric, available after `start()`.
    pub fn offsets(&self, name: &str) -> Option<&MetricOffsets> {
        let index = *self.index.get(name)?;
        self.layout.as_ref()?.offset(index)
    }

    /// Registered metrics in registration order.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// The wire format strategy.
    pub fn format(&self) -> &dyn FileFormat {
        self.format.as_ref()
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the text sidecar, if the format wrote one.
    pub fn sidecar_path(&self) -> Option<&Path> {
        self.sidecar.as_deref()
    }

    /// Syncs the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if there is no live mapping, or the flush
    /// error.
    pub fn flush(&self) -> Result<()> {
        let guard = self.region.load();
        match guard.as_ref() {
            Some(region) => region.flush(),
            None => Err(self.inactive_error().into()),
        }
    }

    fn ensure_unstarted(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == UNSTARTED {
            Ok(())
        } else {
            Err(LifecycleError::AddAfterStart.into())
        }
    }

    fn inactive_error(&self) -> LifecycleError {
        if self.state.load(Ordering::Acquire) == STOPPED {
            LifecycleError::Stopped
        } else {
            LifecycleError::NotStarted
        }
    }
}

/// Wall-clock nanoseconds since the epoch, never zero.
fn generation_stamp() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    nanos.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MmvError;
    use crate::format::FormatVariant;
    use crate::handler::NumericHandler;

    fn writer(dir: &tempfile::TempDir, variant: FormatVariant) -> MmvWriter {
        MmvWriter::new(dir.path().join("test.mmv"), variant.format())
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Mmv);
        w.add_metric("a", Unit::COUNT, Semantics::Counter, 1i32).unwrap();
        let err = w
            .add_metric("a", Unit::COUNT, Semantics::Counter, 2i32)
            .unwrap_err();
        assert!(matches!(
            err,
            MmvError::Configuration(ConfigurationError::DuplicateMetric { .. })
        ));
        assert_eq!(w.metrics().len(), 1);
    }

    #[test]
    fn test_missing_handler_fails_at_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Mmv);
        w.handlers = TypeHandlerRegistry::empty();
        let err = w
            .add_metric("a", Unit::COUNT, Semantics::Counter, 1i32)
            .unwrap_err();
        assert!(matches!(
            err,
            MmvError::Configuration(ConfigurationError::NoHandler { kind: ValueKind::I32 })
        ));
    }

    #[test]
    fn test_explicit_handler_must_match_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Mmv);
        let handler = Arc::new(NumericHandler::new(ValueKind::I64).unwrap());
        let err = w
            .add_metric_with_handler("a", Unit::COUNT, Semantics::Counter, handler.clone(), 1i32)
            .unwrap_err();
        assert!(matches!(
            err,
            MmvError::Configuration(ConfigurationError::TypeMismatch { .. })
        ));
        w.add_metric_with_handler("a", Unit::COUNT, Semantics::Counter, handler, 1i64)
            .unwrap();
    }

    #[test]
    fn test_lifecycle_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Legacy);
        w.add_metric("a", Unit::COUNT, Semantics::Counter, 1i32).unwrap();

        let err = w.update_metric("a", &MetricValue::I32(2)).unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::NotStarted)));
        assert!(w.stop().is_err());

        w.start().unwrap();
        assert!(w.is_started());
        assert_ne!(w.generation(), 0);

        let err = w.start().unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::AlreadyStarted)));
        let err = w
            .add_metric("b", Unit::COUNT, Semantics::Counter, 1i32)
            .unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::AddAfterStart)));
        let handler = Arc::new(NumericHandler::new(ValueKind::I32).unwrap());
        assert!(w.register_handler(ValueKind::I32, handler).is_err());

        w.stop().unwrap();
        w.stop().unwrap();
        assert!(!w.is_started());
        let err = w.update_metric("a", &MetricValue::I32(2)).unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::Stopped)));
    }

    #[test]
    fn test_update_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Mmv);
        w.add_metric("a", Unit::COUNT, Semantics::Counter, 1i32).unwrap();
        w.start().unwrap();

        let err = w.update_metric("nope", &MetricValue::I32(2)).unwrap_err();
        assert!(matches!(err, MmvError::Update(UpdateError::UnknownMetric { .. })));
        let err = w.update_metric("a", &MetricValue::F64(2.0)).unwrap_err();
        assert!(matches!(
            err,
            MmvError::Configuration(ConfigurationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_start_failure_leaves_writer_unstarted() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = MmvWriter::new(dir.path().join("missing").join("x.mmv"), FormatVariant::Mmv.format());
        w.add_metric("a", Unit::COUNT, Semantics::Counter, 1i32).unwrap();

        assert!(matches!(w.start().unwrap_err(), MmvError::Mapping(_)));
        assert!(!w.is_started());
        assert!(w.layout().is_none());
        w.add_metric("b", Unit::COUNT, Semantics::Counter, 1i32).unwrap();
    }

    #[test]
    fn test_unit_is_classified_at_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir, FormatVariant::Mmv);
        w.add_metric("io", Unit::BYTE.per(&Unit::SECOND), Semantics::Counter, 0u64)
            .unwrap();
        assert_eq!(
            w.metrics()[0].mapping().dimension_set(),
            crate::dimension::DimensionSet::SpacePerTime
        );
    }

    #[test]
    fn test_generation_stamp_nonzero() {
        assert_ne!(generation_stamp(), 0);
    }
}
