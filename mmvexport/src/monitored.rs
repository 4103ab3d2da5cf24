//! Ready-made [`Monitorable`] values.
//!
//! Each type carries its own name, [`Semantics`] and [`Unit`] so it can be
//! registered with [`MmvWriter::add_monitorable`](crate::writer::MmvWriter::add_monitorable)
//! and then handed to an [`UpdateNotifier`](crate::bridge::UpdateNotifier)
//! whenever it changes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::bridge::Monitorable;
use crate::unit::Unit;
use crate::value::{MetricValue, Semantics};

/// A monotonically increasing `i64` counter.
#[derive(Debug)]
pub struct MonitoredCounter {
    name: String,
    unit: Unit,
    value: AtomicI64,
}

impl MonitoredCounter {
    /// Creates a counter starting at zero, measured in [`Unit::COUNT`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_unit(name, Unit::COUNT)
    }

    /// Creates a counter starting at zero with an explicit unit.
    pub fn with_unit(name: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
        }
    }

    /// Adds one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Adds `delta`.
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current count.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Always [`Semantics::Counter`].
    pub fn semantics(&self) -> Semantics {
        Semantics::Counter
    }

    /// The counter's unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl Monitorable for MonitoredCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn current(&self) -> MetricValue {
        MetricValue::I64(self.get())
    }
}

/// An `f64` reading that can go up and down.
#[derive(Debug)]
pub struct MonitoredGauge {
    name: String,
    unit: Unit,
    bits: AtomicU64,
}

impl MonitoredGauge {
    /// Creates a gauge with an initial reading.
    pub fn new(name: impl Into<String>, unit: Unit, initial: f64) -> Self {
        Self {
            name: name.into(),
            unit,
            bits: AtomicU64::new(initial.to_bits()),
        }
    }

    /// Replaces the reading.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Current reading.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Always [`Semantics::Instant`].
    pub fn semantics(&self) -> Semantics {
        Semantics::Instant
    }

    /// The gauge's unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl Monitorable for MonitoredGauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn current(&self) -> MetricValue {
        MetricValue::F64(self.get())
    }
}

/// A value fixed at construction, such as a version string.
#[derive(Debug, Clone)]
pub struct MonitoredConstant {
    name: String,
    unit: Unit,
    value: MetricValue,
}

impl MonitoredConstant {
    /// Creates a constant of any kind.
    pub fn new(name: impl Into<String>, unit: Unit, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            unit,
            value: value.into(),
        }
    }

    /// Always [`Semantics::Discrete`].
    pub fn semantics(&self) -> Semantics {
        Semantics::Discrete
    }

    /// The constant's unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl Monitorable for MonitoredConstant {
    fn name(&self) -> &str {
        &self.name
    }

    fn current(&self) -> MetricValue {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = MonitoredCounter::new("jobs.done");
        counter.inc();
        counter.add(4);
        assert_eq!(counter.current(), MetricValue::I64(5));
        assert_eq!(counter.name(), "jobs.done");
        assert_eq!(counter.semantics(), Semantics::Counter);
        assert_eq!(counter.unit(), &Unit::COUNT);
    }

    #[test]
    fn test_gauge() {
        let gauge = MonitoredGauge::new("load", Unit::COUNT, 0.5);
        assert_eq!(gauge.current(), MetricValue::F64(0.5));
        gauge.set(-2.25);
        assert_eq!(gauge.get(), -2.25);
    }

    #[test]
    fn test_constant() {
        let version = MonitoredConstant::new("app.version", Unit::COUNT, "1.4.2");
        assert_eq!(version.current(), MetricValue::Str("1.4.2".to_string()));
        assert_eq!(version.semantics(), Semantics::Discrete);
    }
}
