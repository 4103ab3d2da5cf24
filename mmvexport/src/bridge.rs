//! The update bridge between application threads and the writer.
//!
//! Application threads call [`UpdateNotifier::notify`] when a metric
//! changes. The signal carries no value, only the [`Monitorable`] to re-read.
//! Signals go into a bounded FIFO; a single background thread drains it,
//! reads each metric's current value and writes it with
//! [`MmvWriter::update_metric`]. Only that thread writes through the bridge,
//! so there are no writer-writer races on a slot.
//!
//! # Backpressure
//!
//! `notify` never blocks. When the queue is full the signal is dropped,
//! counted, and a warning is logged at most once per configured interval.
//! The next signal for the same metric carries the then-current value, so
//! a dropped signal only delays an update.
//!
//! # Failure
//!
//! If an update fails, the thread logs the error and exits with it.
//! Monitoring stops, the process does not. [`UpdateBridge::stop`] returns
//! the error as [`UpdateError::BridgeFailed`]. A panic inside
//! [`Monitorable::current`] is logged the same way before the thread
//! unwinds.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{ConfigurationError, LifecycleError, MmvError, Result, UpdateError};
use crate::value::MetricValue;
use crate::writer::MmvWriter;

/// A metric whose current value can be read at any time.
pub trait Monitorable: Send + Sync {
    /// The registered metric name.
    fn name(&self) -> &str;

    /// Reads the value now. Called on the writer thread.
    fn current(&self) -> MetricValue;
}

enum Signal {
    Changed(Arc<dyn Monitorable>),
    Shutdown,
}

const NEVER_WARNED: u64 = u64::MAX;

/// Counters and flags shared by the bridge, its notifiers and its thread.
struct Shared {
    stop: AtomicBool,
    running: AtomicBool,
    dropped: AtomicU64,
    applied: AtomicU64,
    created: Instant,
    last_warning_us: AtomicU64,
    warning_interval: Duration,
}

impl Shared {
    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

        let now = u64::try_from(self.created.elapsed().as_micros()).unwrap_or(u64::MAX - 1);
        let interval = u64::try_from(self.warning_interval.as_micros()).unwrap_or(u64::MAX);
        let last = self.last_warning_us.load(Ordering::Relaxed);
        let due = last == NEVER_WARNED || now.saturating_sub(last) >= interval;
        if due
            && self
                .last_warning_us
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!(dropped, "metric update queue full; dropping change signals");
        }
    }
}

/// Cloneable handle application threads use to signal changes.
#[derive(Clone)]
pub struct UpdateNotifier {
    sender: Sender<Signal>,
    shared: Arc<Shared>,
}

impl UpdateNotifier {
    /// Queues a change signal for `metric` without blocking.
    ///
    /// Returns `false` if the signal was dropped because the queue is full
    /// or the bridge has shut down.
    pub fn notify(&self, metric: Arc<dyn Monitorable>) -> bool {
        match self.sender.try_send(Signal::Changed(metric)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.shared.record_drop();
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Total signals dropped because the queue was full.
    pub fn dropped_signals(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UpdateNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateNotifier")
            .field("queued", &self.sender.len())
            .finish()
    }
}

/// Owns the bounded queue and the single writer thread.
pub struct UpdateBridge {
    config: BridgeConfig,
    sender: Sender<Signal>,
    receiver: Option<Receiver<Signal>>,
    handle: Option<JoinHandle<Result<()>>>,
    shared: Arc<Shared>,
}

impl UpdateBridge {
    /// Creates the queue. Signals can be queued immediately; they are
    /// applied once [`start`](Self::start) runs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidConfig`] for a zero capacity.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "update queue capacity must be at least 1".to_string(),
            }
            .into());
        }

        let (sender, receiver) = bounded(config.capacity);
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            created: Instant::now(),
            last_warning_us: AtomicU64::new(NEVER_WARNED),
            warning_interval: config.overflow_warning_interval,
        });

        Ok(Self {
            config,
            sender,
            receiver: Some(receiver),
            handle: None,
            shared,
        })
    }

    /// Returns a handle for signalling changes.
    pub fn notifier(&self) -> UpdateNotifier {
        UpdateNotifier {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawns the writer thread.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotStarted`] if `writer` has not been started
    /// - [`LifecycleError::BridgeRunning`] if the thread is already running
    /// - [`LifecycleError::Stopped`] if the bridge was already stopped
    pub fn start(&mut self, writer: Arc<MmvWriter>) -> Result<()> {
        if !writer.is_started() {
            return Err(LifecycleError::NotStarted.into());
        }
        if self.handle.is_some() {
            return Err(LifecycleError::BridgeRunning.into());
        }
        let Some(receiver) = self.receiver.take() else {
            return Err(LifecycleError::Stopped.into());
        };

        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_writer_loop(&receiver, &writer, &shared)
                }));
                if let Err(payload) = &outcome {
                    error!(panic = %panic_message(&**payload), "metric update panicked; update bridge exiting");
                }
                drop(receiver);
                shared.running.store(false, Ordering::Release);
                match outcome {
                    Ok(result) => result,
                    Err(payload) => panic::resume_unwind(payload),
                }
            });

        match spawned {
            Ok(handle) => {
                info!(thread = %self.config.thread_name, capacity = self.config.capacity, "update bridge started");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(UpdateError::BridgeFailed {
                    reason: format!("failed to spawn writer thread: {e}"),
                }
                .into())
            }
        }
    }

    /// Stops the writer thread and waits for it.
    ///
    /// Calling it again, or before `start`, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::BridgeFailed`] if the thread had died from an
    /// update error or a panic.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.shared.stop.store(true, Ordering::SeqCst);
        // A full queue means the thread is busy draining and will see the flag.
        let _ = self.sender.try_send(Signal::Shutdown);

        let outcome = match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UpdateError::BridgeFailed {
                reason: e.to_string(),
            }
            .into()),
            Err(payload) => Err(UpdateError::BridgeFailed {
                reason: format!("writer thread panicked: {}", panic_message(&*payload)),
            }
            .into()),
        };
        info!(
            applied = self.applied_updates(),
            dropped = self.dropped_signals(),
            "update bridge stopped"
        );
        outcome
    }

    /// Whether the writer thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Total signals dropped because the queue was full.
    pub fn dropped_signals(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Total values written by the thread.
    pub fn applied_updates(&self) -> u64 {
        self.shared.applied.load(Ordering::Relaxed)
    }

    /// Signals currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// The configuration the bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl Drop for UpdateBridge {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "update bridge ended with an error");
        }
    }
}

impl std::fmt::Debug for UpdateBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBridge")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("queued", &self.queued())
            .field("dropped", &self.dropped_signals())
            .finish()
    }
}

/// Blocks for one signal, drains whatever else is queued, and applies the
/// batch. Exits on shutdown, when the writer is stopped, or on error.
///
/// The stop flag is checked only after a batch, so signals queued before
/// `stop()` are still applied.
fn run_writer_loop(receiver: &Receiver<Signal>, writer: &MmvWriter, shared: &Shared) -> Result<()> {
    let mut batch: Vec<Arc<dyn Monitorable>> = Vec::new();

    loop {
        let mut shutdown = match receiver.recv() {
            Ok(Signal::Changed(metric)) => {
                batch.push(metric);
                false
            }
            Ok(Signal::Shutdown) | Err(_) => true,
        };

        while !shutdown {
            match receiver.try_recv() {
                Ok(Signal::Changed(metric)) => batch.push(metric),
                Ok(Signal::Shutdown) | Err(TryRecvError::Disconnected) => shutdown = true,
                Err(TryRecvError::Empty) => break,
            }
        }

        match apply_batch(&batch, writer, shared) {
            Ok(()) => {}
            Err(MmvError::Lifecycle(LifecycleError::Stopped)) => {
                debug!("writer stopped; update bridge exiting");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "failed to apply metric update; update bridge exiting");
                return Err(e);
            }
        }
        batch.clear();

        if shutdown || shared.stop.load(Ordering::SeqCst) {
            return Ok(());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn apply_batch(batch: &[Arc<dyn Monitorable>], writer: &MmvWriter, shared: &Shared) -> Result<()> {
    let mut seen = HashSet::with_capacity(batch.len());
    for metric in batch {
        if !seen.insert(metric.name()) {
            continue;
        }
        writer.update_metric(metric.name(), &metric.current())?;
        shared.applied.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatVariant;
    use crate::monitored::MonitoredCounter;
    use crate::unit::Unit;
    use crate::value::Semantics;

    fn started_writer(dir: &tempfile::TempDir, counter: &MonitoredCounter) -> Arc<MmvWriter> {
        let mut writer = MmvWriter::new(dir.path().join("bridge.mmv"), FormatVariant::Mmv.format());
        writer
            .add_monitorable(counter, Unit::COUNT, Semantics::Counter)
            .unwrap();
        writer.start().unwrap();
        Arc::new(writer)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BridgeConfig {
            capacity: 0,
            ..BridgeConfig::default()
        };
        assert!(UpdateBridge::new(config).is_err());
    }

    #[test]
    fn test_start_requires_started_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(MmvWriter::new(dir.path().join("x.mmv"), FormatVariant::Mmv.format()));
        let mut bridge = UpdateBridge::new(BridgeConfig::default()).unwrap();
        let err = bridge.start(writer).unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::NotStarted)));
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_double_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let counter = MonitoredCounter::new("hits");
        let writer = started_writer(&dir, &counter);
        let mut bridge = UpdateBridge::new(BridgeConfig::default()).unwrap();

        bridge.start(Arc::clone(&writer)).unwrap();
        let err = bridge.start(writer).unwrap_err();
        assert!(matches!(err, MmvError::Lifecycle(LifecycleError::BridgeRunning)));
        bridge.stop().unwrap();
        bridge.stop().unwrap();
    }

    #[test]
    fn test_queued_before_start_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(MonitoredCounter::new("hits"));
        let writer = started_writer(&dir, &counter);
        let mut bridge = UpdateBridge::new(BridgeConfig::default()).unwrap();

        counter.add(5);
        assert!(bridge.notifier().notify(counter.clone()));
        assert_eq!(bridge.queued(), 1);

        bridge.start(Arc::clone(&writer)).unwrap();
        bridge.stop().unwrap();
        assert_eq!(bridge.applied_updates(), 1);

        let offset = writer.offsets("hits").unwrap().value as usize;
        let bytes = std::fs::read(writer.path()).unwrap();
        assert_eq!(i64::from_ne_bytes(bytes[offset..offset + 8].try_into().unwrap()), 5);
    }

    #[test]
    fn test_overflow_counts_drops() {
        let config = BridgeConfig {
            capacity: 2,
            ..BridgeConfig::default()
        };
        let bridge = UpdateBridge::new(config).unwrap();
        let notifier = bridge.notifier();
        let counter: Arc<dyn Monitorable> = Arc::new(MonitoredCounter::new("hits"));

        assert!(notifier.notify(Arc::clone(&counter)));
        assert!(notifier.notify(Arc::clone(&counter)));
        assert!(!notifier.notify(Arc::clone(&counter)));
        assert!(!notifier.notify(counter));
        assert_eq!(bridge.dropped_signals(), 2);
        assert_eq!(notifier.dropped_signals(), 2);
    }

    #[test]
    fn test_warning_is_rate_limited() {
        let config = BridgeConfig {
            capacity: 1,
            overflow_warning_interval: Duration::from_secs(3600),
            ..BridgeConfig::default()
        };
        let bridge = UpdateBridge::new(config).unwrap();
        bridge.shared.record_drop();
        let first = bridge.shared.last_warning_us.load(Ordering::Relaxed);
        assert_ne!(first, NEVER_WARNED);
        bridge.shared.record_drop();
        assert_eq!(bridge.shared.last_warning_us.load(Ordering::Relaxed), first);
        assert_eq!(bridge.dropped_signals(), 2);
    }

    #[test]
    fn test_batch_is_coalesced_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(MonitoredCounter::new("hits"));
        let writer = started_writer(&dir, &counter);
        let bridge = UpdateBridge::new(BridgeConfig::default()).unwrap();

        let hits: Arc<dyn Monitorable> = counter;
        let batch = vec![Arc::clone(&hits), Arc::clone(&hits), hits];
        apply_batch(&batch, &writer, &bridge.shared).unwrap();
        assert_eq!(bridge.applied_updates(), 1);
    }

    struct Exploding;

    impl Monitorable for Exploding {
        fn name(&self) -> &str {
            "hits"
        }

        fn current(&self) -> MetricValue {
            panic!("sensor unplugged")
        }
    }

    #[test]
    fn test_panic_in_current_stops_thread_and_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let counter = MonitoredCounter::new("hits");
        let writer = started_writer(&dir, &counter);
        let mut bridge = UpdateBridge::new(BridgeConfig::default()).unwrap();
        bridge.start(writer).unwrap();

        assert!(bridge.notifier().notify(Arc::new(Exploding)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!bridge.is_running());
        assert!(!bridge.notifier().notify(Arc::new(Exploding)));

        let err = bridge.stop().unwrap_err();
        assert!(matches!(err, MmvError::Update(UpdateError::BridgeFailed { .. })));
        assert!(err.to_string().contains("sensor unplugged"), "{err}");
    }

    #[test]
    fn test_panic_message_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("static");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*from_str), "static");
        assert_eq!(panic_message(&*from_string), "owned");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
