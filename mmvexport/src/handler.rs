//! Type handler dispatch: value kind → wire encoding.
//!
//! Every metric is bound to a [`TypeHandler`] when it is added to the
//! writer. The handler fixes three things for the metric's whole lifetime:
//! the wire type tag, the slot width, and how a [`MetricValue`] becomes
//! bytes. Handlers are looked up in a [`TypeHandlerRegistry`] keyed by
//! [`ValueKind`]; there is no runtime type inspection.
//!
//! All encodings are host byte order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigurationError, Result};
use crate::value::{MetricValue, ValueKind};

/// Size of a string value slot, including the NUL terminator.
pub const STRING_SLOT_SIZE: usize = 256;

/// MMV wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MmvMetricType {
    /// Signed 32-bit integer.
    I32 = 0,
    /// Unsigned 32-bit integer.
    U32 = 1,
    /// Signed 64-bit integer.
    I64 = 2,
    /// Unsigned 64-bit integer.
    U64 = 3,
    /// 32-bit IEEE float.
    Float = 4,
    /// 64-bit IEEE float.
    Double = 5,
    /// NUL-terminated string stored out of line.
    String = 6,
}

impl MmvMetricType {
    /// Returns the numeric tag written into metric descriptors.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Encodes values of one kind into fixed-width slots.
pub trait TypeHandler: Send + Sync + fmt::Debug {
    /// The value kind this handler encodes.
    fn kind(&self) -> ValueKind;

    /// The wire type tag.
    fn metric_type(&self) -> MmvMetricType;

    /// Fixed slot width in bytes. Drives both alignment and offsets.
    fn data_length(&self) -> usize;

    /// Short type name used in the legacy sidecar file.
    fn type_name(&self) -> &'static str;

    /// Whether values need the large value block instead of the inline
    /// 16-byte payload of an MMV value record.
    fn requires_large_storage(&self) -> bool {
        false
    }

    /// Writes `value` into `slot`, which is exactly `data_length()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::TypeMismatch`] if the value cannot be
    /// encoded by this handler.
    fn encode(&self, value: &MetricValue, slot: &mut [u8]) -> Result<()>;

    /// Validates the slot size and value kind, then encodes.
    ///
    /// Never writes outside `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::SlotSize`] for a slot of the wrong
    /// length and [`ConfigurationError::TypeMismatch`] for a value of the
    /// wrong kind.
    fn put_bytes(&self, slot: &mut [u8], value: &MetricValue) -> Result<()> {
        if slot.len() != self.data_length() {
            return Err(ConfigurationError::SlotSize {
                expected: self.data_length(),
                actual: slot.len(),
            }
            .into());
        }
        if value.kind() != self.kind() {
            return Err(ConfigurationError::TypeMismatch {
                expected: self.kind(),
                actual: value.kind(),
            }
            .into());
        }
        self.encode(value, slot)
    }
}

/// Handler for the fixed-width numeric kinds and `bool`.
#[derive(Debug, Clone, Copy)]
pub struct NumericHandler {
    kind: ValueKind,
}

impl NumericHandler {
    /// Creates the handler for a numeric kind.
    ///
    /// Returns `None` for [`ValueKind::Str`].
    pub fn new(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Str => None,
            _ => Some(Self { kind }),
        }
    }
}

impl TypeHandler for NumericHandler {
    fn kind(&self) -> ValueKind {
        self.kind
    }

    fn metric_type(&self) -> MmvMetricType {
        match self.kind {
            ValueKind::Bool | ValueKind::I32 => MmvMetricType::I32,
            ValueKind::U32 => MmvMetricType::U32,
            ValueKind::I64 => MmvMetricType::I64,
            ValueKind::U64 => MmvMetricType::U64,
            // f32 is widened so readers only deal with one float type
            ValueKind::F32 | ValueKind::F64 => MmvMetricType::Double,
            ValueKind::Str => MmvMetricType::String,
        }
    }

    fn data_length(&self) -> usize {
        match self.metric_type() {
            MmvMetricType::I32 | MmvMetricType::U32 | MmvMetricType::Float => 4,
            MmvMetricType::I64 | MmvMetricType::U64 | MmvMetricType::Double => 8,
            MmvMetricType::String => STRING_SLOT_SIZE,
        }
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Bool => "boolean",
            ValueKind::I32 => "int32",
            ValueKind::U32 => "uint32",
            ValueKind::I64 => "int64",
            ValueKind::U64 => "uint64",
            ValueKind::F32 | ValueKind::F64 => "double",
            ValueKind::Str => "string",
        }
    }

    fn encode(&self, value: &MetricValue, slot: &mut [u8]) -> Result<()> {
        match value {
            MetricValue::Bool(v) => slot.copy_from_slice(&i32::from(*v).to_ne_bytes()),
            MetricValue::I32(v) => slot.copy_from_slice(&v.to_ne_bytes()),
            MetricValue::U32(v) => slot.copy_from_slice(&v.to_ne_bytes()),
            MetricValue::I64(v) => slot.copy_from_slice(&v.to_ne_bytes()),
            MetricValue::U64(v) => slot.copy_from_slice(&v.to_ne_bytes()),
            MetricValue::F32(v) => slot.copy_from_slice(&f64::from(*v).to_ne_bytes()),
            MetricValue::F64(v) => slot.copy_from_slice(&v.to_ne_bytes()),
            MetricValue::Str(_) => {
                return Err(ConfigurationError::TypeMismatch {
                    expected: self.kind,
                    actual: ValueKind::Str,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Handler for text values.
///
/// Text longer than the slot is truncated at a UTF-8 character boundary to
/// leave room for the NUL terminator; the rest of the slot is zeroed.
#[derive(Debug, Clone, Copy)]
pub struct StringHandler {
    slot_size: usize,
}

impl StringHandler {
    /// Creates a string handler with the standard 256-byte slot.
    pub fn new() -> Self {
        Self {
            slot_size: STRING_SLOT_SIZE,
        }
    }

    /// Creates a string handler with a `slot_size`-byte slot (at least one
    /// byte, for the NUL terminator).
    pub fn with_slot_size(slot_size: usize) -> Self {
        Self {
            slot_size: slot_size.max(1),
        }
    }
}

impl Default for StringHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeHandler for StringHandler {
    fn kind(&self) -> ValueKind {
        ValueKind::Str
    }

    fn metric_type(&self) -> MmvMetricType {
        MmvMetricType::String
    }

    fn data_length(&self) -> usize {
        self.slot_size
    }

    fn type_name(&self) -> &'static str {
        "string"
    }

    fn requires_large_storage(&self) -> bool {
        true
    }

    fn encode(&self, value: &MetricValue, slot: &mut [u8]) -> Result<()> {
        let MetricValue::Str(text) = value else {
            return Err(ConfigurationError::TypeMismatch {
                expected: ValueKind::Str,
                actual: value.kind(),
            }
            .into());
        };

        let mut end = text.len().min(self.slot_size - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        slot[..end].copy_from_slice(&text.as_bytes()[..end]);
        slot[end..].fill(0);
        Ok(())
    }
}

/// Table of handlers keyed by value kind.
///
/// Starts out with a handler for every [`ValueKind`]. Callers can replace
/// entries before the writer is started.
#[derive(Debug, Clone)]
pub struct TypeHandlerRegistry {
    handlers: HashMap<ValueKind, Arc<dyn TypeHandler>>,
}

impl TypeHandlerRegistry {
    /// Creates a registry with the default handler for every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for kind in [
            ValueKind::Bool,
            ValueKind::I32,
            ValueKind::U32,
            ValueKind::I64,
            ValueKind::U64,
            ValueKind::F32,
            ValueKind::F64,
        ] {
            if let Some(handler) = NumericHandler::new(kind) {
                registry.register(kind, Arc::new(handler));
            }
        }
        registry.register(ValueKind::Str, Arc::new(StringHandler::new()));
        registry
    }

    /// Creates a registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register(&mut self, kind: ValueKind, handler: Arc<dyn TypeHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Looks up the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoHandler`] if none is registered.
    pub fn resolve(&self, kind: ValueKind) -> Result<Arc<dyn TypeHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConfigurationError::NoHandler { kind }.into())
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
