//! Registered metric definitions.

use std::fmt;
use std::sync::Arc;

use crate::dimension::UnitMapping;
use crate::handler::TypeHandler;
use crate::unit::Unit;
use crate::value::{MetricValue, Semantics};

/// A metric as the writer knows it after registration.
///
/// Everything here is fixed at `add_metric` time: the handler has been
/// resolved and the unit classified. The file offsets are assigned later,
/// at `start()`, and live in the writer's [`FileLayout`](crate::layout::FileLayout).
#[derive(Clone)]
pub struct Metric {
    name: String,
    semantics: Semantics,
    unit: Unit,
    mapping: UnitMapping,
    handler: Arc<dyn TypeHandler>,
    initial: MetricValue,
}

impl Metric {
    pub(crate) fn new(
        name: String,
        semantics: Semantics,
        unit: Unit,
        mapping: UnitMapping,
        handler: Arc<dyn TypeHandler>,
        initial: MetricValue,
    ) -> Self {
        Self {
            name,
            semantics,
            unit,
            mapping,
            handler,
            initial,
        }
    }

    /// The dotted metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How readers should interpret the values.
    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// The unit the metric was registered with.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// The classified unit written into the descriptor.
    pub fn mapping(&self) -> &UnitMapping {
        &self.mapping
    }

    /// The handler encoding this metric's values.
    pub fn handler(&self) -> &Arc<dyn TypeHandler> {
        &self.handler
    }

    /// The value written at `start()`.
    pub fn initial(&self) -> &MetricValue {
        &self.initial
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("semantics", &self.semantics)
            .field("unit", &self.unit.symbol())
            .field("type", &self.handler.type_name())
            .field("initial", &self.initial)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_metric(name: &str, initial: MetricValue) -> Metric {
    use crate::dimension::UnitMappingTable;
    use crate::handler::TypeHandlerRegistry;

    let handler = TypeHandlerRegistry::with_defaults()
        .resolve(initial.kind())
        .unwrap();
    let mapping = UnitMappingTable::new().unit_count().clone();
    Metric::new(
        name.to_string(),
        Semantics::Instant,
        Unit::COUNT,
        mapping,
        handler,
        initial,
    )
}
